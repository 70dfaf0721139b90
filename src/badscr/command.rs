use std::str::FromStr;

use super::interval::IntervalCommand;

/// One line of the interactive bad-scaler-read review.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewCommand {
    Toggle(usize),
    ToggleRange(usize, usize),
    Interval(IntervalCommand),
    /// Runs the configured method on the current run again.
    Process,
    Next,
    Previous,
    Goto(usize),
    Write,
    Quit,
}

impl ReviewCommand {
    pub const HELP: &'static str = "t <read>: toggle read | tr <first> <last>: toggle reads | \
z: zoom | home/end: first/last window | pgup/pgdn: page | c: run method | n/p: next/previous run | \
g <index>: go to run | w: write | q: quit";
}

fn index(token: Option<&str>) -> Result<usize, String> {
    let token = token.ok_or_else(|| "missing scaler read".to_owned())?;
    token
        .parse()
        .map_err(|_| format!("'{token}' is not a valid index"))
}

impl FromStr for ReviewCommand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut tokens = s.split_whitespace();
        let Some(command) = tokens.next() else {
            return Err("empty command".to_owned());
        };
        let parsed = match command {
            "t" | "toggle" => Self::Toggle(index(tokens.next())?),
            "tr" | "range" => Self::ToggleRange(index(tokens.next())?, index(tokens.next())?),
            "z" | "zoom" => Self::Interval(IntervalCommand::ToggleZoom),
            "home" => Self::Interval(IntervalCommand::First),
            "end" => Self::Interval(IntervalCommand::Last),
            "pgup" => Self::Interval(IntervalCommand::PageBack),
            "pgdn" => Self::Interval(IntervalCommand::PageForward),
            "c" | "calib" => Self::Process,
            "n" | "next" => Self::Next,
            "p" | "prev" | "previous" => Self::Previous,
            "g" | "goto" => Self::Goto(index(tokens.next())?),
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
    fn test_parse_review_commands() {
        assert_eq!("t 4".parse(), Ok(ReviewCommand::Toggle(4)));
        assert_eq!("tr 9 3".parse(), Ok(ReviewCommand::ToggleRange(9, 3)));
        assert_eq!(
            "pgdn".parse(),
            Ok(ReviewCommand::Interval(IntervalCommand::PageForward))
        );
        assert_eq!("q".parse(), Ok(ReviewCommand::Quit));
        assert!("t".parse::<ReviewCommand>().is_err());
        assert!("t -1".parse::<ReviewCommand>().is_err());
        assert!("w now".parse::<ReviewCommand>().is_err());
    }
}
