//! Console commands.

use crate::agent::registry::ScriptId;
use crate::agent::StepAction;

#[derive(thiserror::Error, Debug, PartialEq)]
pub enum CommandError {
    #[error("malformed command: {0}")]
    Parsing(String),
    #[error("unknown command `{0}`, type `help` for a list of commands")]
    Unknown(String),
}

pub type CommandResult<T> = Result<T, CommandError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileCommand {
    Start,
    Stop,
}

/// Commands that user may enter in a console.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Print known scripts.
    Scripts,
    /// Request the list of scripts from the VM again.
    RefreshScripts,
    Source(ScriptId),
    /// Breakpoint at 1-based line.
    Break {
        script: ScriptId,
        line: i64,
    },
    Delete {
        script: ScriptId,
        line: i64,
    },
    Continue,
    Step(StepAction),
    Pause,
    Backtrace,
    /// Evaluate expression in the selected (or top) frame.
    Eval {
        frame: usize,
        expression: String,
    },
    /// Resolve properties of object by its handle.
    Inspect(i64),
    PauseOnExceptions(bool),
    Profile(ProfileCommand),
    Reset,
    Help,
}

pub const HELP: &str = "\
scripts [refresh]          -- print parsed scripts or request them again
source <script>            -- print script source
break|b <script> <line>    -- set breakpoint
delete|d <script> <line>   -- remove breakpoint
continue|c                 -- continue execution
step|s [in|out|over]       -- make a step (step over by default)
pause                      -- stop execution as soon as possible
backtrace|bt               -- print call stack
eval [#<frame>] <expr>     -- evaluate expression in a call frame
inspect <handle>           -- print properties of an object
exceptions on|off          -- stop on exceptions
profile start|stop         -- control CPU profiler
reset                      -- forget session state
help                       -- this message
quit|q                     -- exit";

fn parse_number<T: std::str::FromStr>(arg: Option<&str>, what: &str) -> CommandResult<T> {
    let arg = arg.ok_or_else(|| CommandError::Parsing(format!("{what} expected")))?;
    arg.parse()
        .map_err(|_| CommandError::Parsing(format!("invalid {what} `{arg}`")))
}

fn parse_place<'a>(mut args: impl Iterator<Item = &'a str>) -> CommandResult<(ScriptId, i64)> {
    let script = parse_number(args.next(), "script id")?;
    let line: i64 = parse_number(args.next(), "line number")?;
    if line < 1 {
        return Err(CommandError::Parsing("line numbers start from 1".to_string()));
    }
    Ok((script, line))
}

impl Command {
    pub fn parse(input: &str) -> CommandResult<Self> {
        let input = input.trim();
        let (name, rest) = input
            .split_once(char::is_whitespace)
            .map(|(name, rest)| (name, rest.trim()))
            .unwrap_or((input, ""));
        let mut args = rest.split_whitespace();

        let cmd = match name {
            "scripts" => match args.next() {
                None => Command::Scripts,
                Some("refresh") => Command::RefreshScripts,
                Some(other) => {
                    return Err(CommandError::Parsing(format!("unexpected argument `{other}`")))
                }
            },
            "source" => Command::Source(parse_number(args.next(), "script id")?),
            "break" | "b" => {
                let (script, line) = parse_place(args)?;
                Command::Break { script, line }
            }
            "delete" | "d" => {
                let (script, line) = parse_place(args)?;
                Command::Delete { script, line }
            }
            "continue" | "c" => Command::Continue,
            "step" | "s" => match args.next() {
                None | Some("over") | Some("next") => Command::Step(StepAction::Next),
                Some("in") | Some("into") => Command::Step(StepAction::In),
                Some("out") => Command::Step(StepAction::Out),
                Some(other) => {
                    return Err(CommandError::Parsing(format!("unknown step kind `{other}`")))
                }
            },
            "pause" => Command::Pause,
            "backtrace" | "bt" => Command::Backtrace,
            "eval" | "e" | "p" => {
                let (frame, expression) = match rest.strip_prefix('#') {
                    Some(with_frame) => {
                        let (frame, expr) = with_frame
                            .split_once(char::is_whitespace)
                            .unwrap_or((with_frame, ""));
                        (parse_number(Some(frame), "frame number")?, expr.trim())
                    }
                    None => (0, rest),
                };
                if expression.is_empty() {
                    return Err(CommandError::Parsing("expression expected".to_string()));
                }
                Command::Eval {
                    frame,
                    expression: expression.to_string(),
                }
            }
            "inspect" | "i" => Command::Inspect(parse_number(args.next(), "object handle")?),
            "exceptions" => match args.next() {
                Some("on") => Command::PauseOnExceptions(true),
                Some("off") => Command::PauseOnExceptions(false),
                _ => return Err(CommandError::Parsing("`on` or `off` expected".to_string())),
            },
            "profile" => match args.next() {
                Some("start") => Command::Profile(ProfileCommand::Start),
                Some("stop") => Command::Profile(ProfileCommand::Stop),
                _ => return Err(CommandError::Parsing("`start` or `stop` expected".to_string())),
            },
            "reset" => Command::Reset,
            "help" | "h" => Command::Help,
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(cmd)
    }
}
