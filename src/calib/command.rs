use std::str::FromStr;
use std::time::Duration;

/// One line of the interactive calibration prompt.
#[derive(Debug, Clone, PartialEq)]
pub enum ModuleCommand {
    Next,
    Previous,
    Goto(usize),
    SetMarker { index: usize, position: f64 },
    Reprocess,
    ProcessAll(Duration),
    Print,
    Write,
    Quit,
}

impl ModuleCommand {
    pub const HELP: &'static str = "n: next | p: previous | g <elem>: go to element | m <marker> <pos>: move marker | \
r: re-fit current | a [delay ms]: process all | v: print values | w: write | q: quit";
}

fn parse<T: FromStr>(token: Option<&str>, what: &str) -> Result<T, String> {
    let token = token.ok_or_else(|| format!("missing {what}"))?;
    token
        .parse()
        .map_err(|_| format!("'{token}' is not a valid {what}"))
}

impl FromStr for ModuleCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = s.split_whitespace();
        let Some(command) = tokens.next() else {
            return Err("empty command".to_owned());
        };
        let parsed = match command {
            "n" | "next" => Self::Next,
            "p" | "prev" | "previous" => Self::Previous,
            "g" | "goto" => Self::Goto(parse(tokens.next(), "element")?),
            "m" | "marker" => Self::SetMarker {
                index: parse(tokens.next(), "marker index")?,
                position: parse(tokens.next(), "position")?,
            },
            "r" | "refit" => Self::Reprocess,
            "a" | "all" => {
                let delay = match tokens.next() {
                    Some(ms) => parse::<u64>(Some(ms), "delay")?,
                    None => 0,
                };
                Self::ProcessAll(Duration::from_millis(delay))
            }
            "v" | "print" => Self::Print,
            "w" | "write" => Self::Write,
            "q" | "quit" => Self::Quit,
            other => return Err(format!("unknown command '{other}'")),
        };
        if let Some(extra) = tokens.next() {
            return Err(format!("unexpected argument '{extra}'"));
        }
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!("n".parse(), Ok(ModuleCommand::Next));
        assert_eq!(" goto 12 ".parse(), Ok(ModuleCommand::Goto(12)));
        assert_eq!(
            "m 1 4.25".parse(),
            Ok(ModuleCommand::SetMarker {
                index: 1,
                position: 4.25
            })
        );
        assert_eq!(
            "a 250".parse(),
            Ok(ModuleCommand::ProcessAll(Duration::from_millis(250)))
        );
        assert_eq!("a".parse(), Ok(ModuleCommand::ProcessAll(Duration::ZERO)));
    }

    #[test]
    fn test_reject_malformed() {
        assert!("".parse::<ModuleCommand>().is_err());
        assert!("m 1".parse::<ModuleCommand>().is_err());
        assert!("g x".parse::<ModuleCommand>().is_err());
        assert!("n 3".parse::<ModuleCommand>().is_err());
        assert!("z".parse::<ModuleCommand>().is_err());
    }
}
