//! Incremental parser that extracts complete JSON strings out of a
//! partially-received JSON array, safe across arbitrary chunk boundaries.
//!
//! Implemented as a pure state machine over a sliding `String` buffer per
//! the design note against depending on a streaming JSON library that
//! requires the whole document up front.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    BeforeArray,
    InArray,
    InString,
    Terminal,
}

/// One instance per upstream stream. Feed it chunks as they arrive; it
/// yields each array item the moment its closing, unescaped quote lands.
#[derive(Debug, Clone)]
pub struct StreamingArrayParser {
    buffer: String,
    state: State,
    current: String,
    escape_next: bool,
}

impl Default for StreamingArrayParser {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamingArrayParser {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            state: State::BeforeArray,
            current: String::new(),
            escape_next: false,
        }
    }

    /// True once the terminal `]` has been consumed.
    pub fn is_finished(&self) -> bool {
        self.state == State::Terminal
    }

    /// Feed a new chunk of upstream text and return every string that
    /// became complete as a result.
    pub fn feed(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut out = Vec::new();

        loop {
            match self.state {
                State::Terminal => break,
                State::BeforeArray => {
                    if let Some(idx) = self.buffer.find('[') {
                        self.buffer.drain(..=idx);
                        self.state = State::InArray;
                    } else {
                        self.buffer.clear();
                        break;
                    }
                }
                State::InArray => {
                    let trimmed = self.buffer.trim_start();
                    let skipped = self.buffer.len() - trimmed.len();
                    if skipped > 0 {
                        self.buffer.drain(..skipped);
                    }
                    let Some(c) = self.buffer.chars().next() else {
                        break;
                    };
                    match c {
                        ']' => {
                            self.buffer.drain(..1);
                            self.state = State::Terminal;
                        }
                        ',' => {
                            self.buffer.drain(..1);
                        }
                        '"' => {
                            self.buffer.drain(..1);
                            self.current.clear();
                            self.escape_next = false;
                            self.state = State::InString;
                        }
                        _ => {
                            // Non-string token (number, null, nested array) — outside
                            // the contract; skip one char at a time so a malformed
                            // stream can't spin forever.
                            self.buffer.drain(..1);
                        }
                    }
                }
                State::InString => {
                    let mut consumed = 0;
                    let mut closed = false;
                    for c in self.buffer.chars() {
                        consumed += c.len_utf8();
                        if self.escape_next {
                            self.current.push(unescape_char(c));
                            self.escape_next = false;
                            continue;
                        }
                        match c {
                            '\\' => self.escape_next = true,
                            '"' => {
                                closed = true;
                                break;
                            }
                            _ => self.current.push(c),
                        }
                    }
                    self.buffer.drain(..consumed);
                    if closed {
                        out.push(std::mem::take(&mut self.current));
                        self.state = State::InArray;
                    } else {
                        // End of buffer reached before the closing quote; retain
                        // what we have (it's already drained into `current`) and
                        // wait for the next chunk.
                        break;
                    }
                }
            }
        }

        out
    }
}

/// Resolve a single escaped character following a backslash. This only
/// handles the short escapes; `\uXXXX` is deliberately unsupported since
/// every upstream prompt in scope is asked for plain unicode text, not
/// escaped code points, and supporting it would require buffering across
/// a 6-byte boundary the state machine doesn't currently track.
fn unescape_char(c: char) -> char {
    match c {
        'n' => '\n',
        't' => '\t',
        'r' => '\r',
        'b' => '\u{0008}',
        'f' => '\u{000C}',
        other => other,
    }
}
