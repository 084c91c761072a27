// Motion-line parsing
//
// Tokens are `<axis letter><signed float>` for X, Y, Z, F and E, found anywhere
// in the line and in any order. A letter only starts a token when it is not
// glued to a preceding letter, so words like `EXTRUDE` or `Error` never leak
// values. The first token per axis wins; if its number does not parse, that axis
// is unset.

use regex::Regex;
use std::sync::OnceLock;

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([XYZFE])([-+0-9.]*)").expect("static pattern"))
}

fn motion_command_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?:^|[^A-Za-z0-9])G0?[0-3](?:[^0-9.]|$)").expect("static pattern")
    })
}

/// Values extracted from one line. `z` is always resolved (falls back to the
/// previous Z); the rest are `None` when absent or malformed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionFields {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: f64,
    pub feed: Option<f64>,
    pub extrusion: Option<f64>,
}

/// Whether the line carries a move: linear `G0`/`G1` or arc `G2`/`G3`, also
/// zero-padded. Arcs are tracked by their end point.
pub fn is_motion_command(line: &str) -> bool {
    motion_command_pattern().is_match(line)
}

/// Extract `(x?, y?, z, feed?, extrusion?)` from one raw command line.
///
/// Missing Z returns `previous_z` unchanged. Never fails: unparseable numbers
/// just leave their field unset.
pub fn parse_motion_line(line: &str, previous_z: f64) -> MotionFields {
    let mut x = None;
    let mut y = None;
    let mut z = None;
    let mut feed = None;
    let mut extrusion = None;
    let mut seen = [false; 5];

    for caps in token_pattern().captures_iter(line) {
        let (Some(letter), Some(number)) = (caps.get(1), caps.get(2)) else {
            continue;
        };

        let glued = line[..letter.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_alphabetic());
        if glued {
            continue;
        }

        let (slot, index) = match letter.as_str() {
            "X" => (&mut x, 0),
            "Y" => (&mut y, 1),
            "Z" => (&mut z, 2),
            "F" => (&mut feed, 3),
            "E" => (&mut extrusion, 4),
            _ => continue,
        };

        if seen[index] {
            continue;
        }
        seen[index] = true;
        *slot = parse_number(number.as_str());
    }

    MotionFields {
        x,
        y,
        z: z.unwrap_or(previous_z),
        feed,
        extrusion,
    }
}

fn parse_number(text: &str) -> Option<f64> {
    text.parse::<f64>().ok().filter(|v| v.is_finite())
}
