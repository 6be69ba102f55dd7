use rustyline::{Editor, Helper, Config, error::ReadlineError, Context};
use rustyline::completion::{Completer, Pair};
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use std::future::Future;
use std::path::Path;


#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    All,
    Name(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Status,
    Start(Target),
    Stop(Target),
    Reload,
    Help,
    Exit,
    Empty,
    Unknown(String),
}

pub const HELP: &str = "commands: status | start <name>|all | stop <name>|all | reload | help | exit";


/*
    @@@
    @parse_command();
    . Maps one input line to a ShellCommand; `start`/`stop` take a program name or `all`.
    . A bare `start`/`stop` is reported as unknown rather than guessed.
*/
pub fn parse_command(line: &str) -> ShellCommand {
    let mut words = line.split_whitespace();
    let Some(verb) = words.next() else {
        return ShellCommand::Empty;
    };
    let arg = words.next();

    match (verb, arg) {
        ("status", None) => ShellCommand::Status,
        ("reload", None) => ShellCommand::Reload,
        ("help", None) => ShellCommand::Help,
        ("exit" | "quit", None) => ShellCommand::Exit,
        ("start", Some(arg)) => ShellCommand::Start(target(arg)),
        ("stop", Some(arg)) => ShellCommand::Stop(target(arg)),
        _ => ShellCommand::Unknown(line.trim().to_string()),
    }
}

fn target(arg: &str) -> Target {
    if arg == "all" {
        Target::All
    } else {
        Target::Name(arg.to_string())
    }
}


/*
    @@@
    @CmdCompleter;
    . Completes the verb on the first word and a program name (or `all`) after start/stop.
*/
struct CmdCompleter {
    commands: Vec<String>,
    names: Vec<String>,
}
impl Helper for CmdCompleter {}
impl Hinter for CmdCompleter {
    type Hint = String;
}
impl Highlighter for CmdCompleter {}
impl Validator for CmdCompleter {}
impl Completer for CmdCompleter {
    type Candidate = Pair;
    fn complete(&self, line: &str, pos: usize, _ctx: &Context<'_>) -> Result<(usize, Vec<Pair>), ReadlineError> {
        let line = &line[..pos];
        let (prefix, pool) = match line.split_once(' ') {
            Some((verb, rest)) if verb == "start" || verb == "stop" => (rest.trim_start(), &self.names),
            Some(_) => return Ok((pos, Vec::new())),
            None => (line, &self.commands),
        };
        let start = line.len() - prefix.len();
        let matches = pool
            .iter()
            .filter(|c| c.starts_with(prefix))
            .map(|c| Pair {
                display: c.clone(),
                replacement: c.clone(),
            })
            .collect();
        Ok((start, matches))
    }
}




/*
    @@@
    @run_shell();
    . Reads lines with history kept in `history`, offering completion for commands and the given program names.
    . Hands every parsed command except `exit` to on_command and awaits it before prompting again.
    . Ctrl-C / Ctrl-D leave the shell like `exit` does.
*/
pub async fn run_shell<OnCommand, Fut>(
    history: &Path,
    names: Vec<String>,
    mut on_command: OnCommand,
) -> rustyline::Result<()>
where
    OnCommand: FnMut(ShellCommand) -> Fut,
    Fut: Future<Output = ()>,
{
    let config = Config::builder().auto_add_history(false).build();
    let mut rl = Editor::with_config(config)?;
    let mut names = names;
    names.push("all".to_string());
    rl.set_helper(Some(CmdCompleter {
        commands: vec!["status", "start", "stop", "reload", "help", "exit"].into_iter().map(String::from).collect(),
        names,
    }));
    let _ = rl.load_history(history);

    loop {
        let line = rl.readline("procsup> ");
        match line {
            Ok(line) => {
                let input = line.trim();
                if !input.is_empty() {
                    rl.add_history_entry(input)?;
                }
                match parse_command(input) {
                    ShellCommand::Exit => break,
                    ShellCommand::Empty => {}
                    cmd => on_command(cmd).await,
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                tracing::error!(error = ?err, "shell read failed");
                eprintln!("Error: {:?}", err);
                break;
            },
        }
    }

    rl.save_history(history)?;
    Ok(())
}
