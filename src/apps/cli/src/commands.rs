/// One parsed line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Submit(String),
    Cancel,
    /// `None` approves every call awaiting a decision.
    Approve(Option<String>),
    Deny {
        call_id: String,
        reason: Option<String>,
    },
    /// Bulk denials carry no reason.
    DenyAll,
    Queue,
    Now(String),
    Drop(String),
    Usage,
    Help,
    Quit,
}

pub const HELP: &str = "\
Type a message to send it. Commands:
  /cancel                     stop the running turn
  /approve [call_id]          approve one call, or all awaiting calls
  /deny [call_id [reason]]    deny one call with an optional reason, or all awaiting calls
  /queue                      list queued input
  /now <id>                   send a queued message immediately
  /drop <id>                  remove a queued message
  /usage                      show token usage
  /quit                       exit";

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Ok(Some(Command::Submit(line.to_string())));
    };

    let (name, args) = match rest.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (rest, ""),
    };
    let first_arg = || args.split_whitespace().next().map(str::to_string);

    let command = match name {
        "cancel" | "stop" => Command::Cancel,
        "approve" => Command::Approve(first_arg()),
        "deny" if args.is_empty() => Command::DenyAll,
        "deny" => {
            let (call_id, reason) = match args.split_once(char::is_whitespace) {
                Some((call_id, reason)) => (call_id, Some(reason.trim().to_string())),
                None => (args, None),
            };
            Command::Deny {
                call_id: call_id.to_string(),
                reason,
            }
        }
        "queue" => Command::Queue,
        "now" => Command::Now(first_arg().ok_or("usage: /now <queued id>")?),
        "drop" => Command::Drop(first_arg().ok_or("usage: /drop <queued id>")?),
        "usage" => Command::Usage,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command: /{} (try /help)", other)),
    };
    Ok(Some(command))
}
