//! Structural repair of truncated JSON objects.
//!
//! `close_structure` scans the text once, tracking whether the cursor is
//! inside a string (honouring escapes) and the stack of open containers.
//! Anything left open at the end is closed in reverse order; an incomplete
//! key, or a key whose value never started, is dropped.

/// What an open object expects next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Key,
    Colon,
    Value,
    Comma,
}

#[derive(Debug, Clone, Copy)]
enum Frame {
    Object {
        expect: Expect,
        /// Byte offset of the opening quote of the current key.
        key_start: Option<usize>,
    },
    Array,
}

impl Frame {
    fn closer(&self) -> char {
        match self {
            Frame::Object { .. } => '}',
            Frame::Array => ']',
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenString {
    start: usize,
    is_key: bool,
}

#[derive(Debug, Default)]
struct ScanState {
    stack: Vec<Frame>,
    open_string: Option<OpenString>,
    escaped: bool,
}

fn value_started(stack: &mut [Frame]) {
    if let Some(Frame::Object { expect, .. }) = stack.last_mut()
        && *expect == Expect::Value
    {
        *expect = Expect::Comma;
    }
}

fn scan(text: &str) -> ScanState {
    let mut state = ScanState::default();

    for (i, ch) in text.char_indices() {
        if let Some(open) = state.open_string {
            if state.escaped {
                state.escaped = false;
                continue;
            }
            match ch {
                '\\' => state.escaped = true,
                '"' => {
                    if open.is_key
                        && let Some(Frame::Object { expect, .. }) = state.stack.last_mut()
                    {
                        *expect = Expect::Colon;
                    }
                    state.open_string = None;
                }
                _ => {}
            }
            continue;
        }

        match ch {
            '"' => {
                let is_key = match state.stack.last_mut() {
                    Some(Frame::Object { expect, key_start }) if *expect == Expect::Key => {
                        *key_start = Some(i);
                        true
                    }
                    _ => {
                        value_started(&mut state.stack);
                        false
                    }
                };
                state.open_string = Some(OpenString { start: i, is_key });
            }
            '{' => {
                value_started(&mut state.stack);
                state.stack.push(Frame::Object {
                    expect: Expect::Key,
                    key_start: None,
                });
            }
            '[' => {
                value_started(&mut state.stack);
                state.stack.push(Frame::Array);
            }
            '}' | ']' => {
                state.stack.pop();
            }
            ':' => {
                if let Some(Frame::Object { expect, .. }) = state.stack.last_mut()
                    && *expect == Expect::Colon
                {
                    *expect = Expect::Value;
                }
            }
            ',' => {
                if let Some(Frame::Object { expect, key_start }) = state.stack.last_mut() {
                    *expect = Expect::Key;
                    *key_start = None;
                }
            }
            c if c.is_whitespace() => {}
            _ => value_started(&mut state.stack),
        }
    }

    state
}

/// Remove trailing commas and colons left behind by truncation.
fn strip_dangling(out: &mut String) {
    loop {
        let trimmed_len = out.trim_end().len();
        out.truncate(trimmed_len);
        match out.chars().last() {
            Some(',') | Some(':') => {
                out.pop();
            }
            _ => break,
        }
    }
}

fn close_frames(mut out: String, stack: &[Frame]) -> String {
    strip_dangling(&mut out);
    for frame in stack.iter().rev() {
        out.push(frame.closer());
    }
    out
}

/// Close every open string and container in `text`.
///
/// An unterminated key is dropped. An unterminated value string is closed
/// with a quote, keeping the partial text.
pub(crate) fn close_structure(text: &str) -> String {
    let state = scan(text);

    let out = match state.open_string {
        Some(open) if open.is_key => text[..open.start].to_string(),
        Some(_) => {
            let mut out = text.to_string();
            if state.escaped {
                out.pop();
            }
            out.push('"');
            out
        }
        None => match state.stack.last() {
            Some(Frame::Object {
                expect: Expect::Colon | Expect::Value,
                key_start: Some(start),
            }) => text[..*start].to_string(),
            _ => text.to_string(),
        },
    };

    close_frames(out, &state.stack)
}

/// Like `close_structure`, but an unterminated value string is removed
/// along with its key instead of being closed.
pub(crate) fn close_structure_truncating(text: &str) -> Option<String> {
    let state = scan(text);
    let open = state.open_string.filter(|open| !open.is_key)?;

    let cut = match state.stack.last() {
        Some(Frame::Object {
            key_start: Some(start),
            ..
        }) => *start,
        _ => open.start,
    };

    Some(close_frames(text[..cut].to_string(), &state.stack))
}
