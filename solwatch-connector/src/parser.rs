//! # Log Scanner & Event Parser
//!
//! A transaction's logs are a flat list of lines, but they describe a call
//! tree: each `Program <id> invoke [n]` opens a frame at depth `n` and each
//! `Program <id> success` closes one. Only lines emitted while the target
//! program is on top of that tree can carry its events.
//!
//! [`EventParser::parse`] replays the tree with an [`ExecutionStack`] built
//! fresh for every call and yields events in log order:
//!
//! ```text
//! Program ABC invoke [1]          push ABC
//! Program data: <event>           ABC on top -> decode
//! Program XYZ invoke [2]          push Foreign
//! Program log: <not ours>         Foreign on top -> ignored
//! Program XYZ success             pop
//! Program ABC success             pop; next line opens a sibling? push it
//! ```

use crate::{
    decoder::EventDecoder,
    error::ParseError,
    events::{EventContext, ParsedEvent},
};
use solana_sdk::pubkey::Pubkey;
use std::iter::Peekable;

const PROGRAM_PREFIX: &str = "Program ";
const PROGRAM_LOG: &str = "Program log: ";
const PROGRAM_DATA: &str = "Program data: ";

/// A program executing at some call depth.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationFrame {
    Program(String),
    /// A nested call to some other program, whose identity is not tracked.
    Foreign,
}

/// Frames of the current call chain, top = currently executing program.
#[derive(Debug, Default)]
pub struct ExecutionStack {
    frames: Vec<InvocationFrame>,
}

impl ExecutionStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: InvocationFrame) {
        self.frames.push(frame);
    }

    /// Pops the top frame. An empty stack means the scanner lost track of the
    /// call tree.
    pub fn pop(&mut self, line: &str) -> Result<InvocationFrame, ParseError> {
        self.frames
            .pop()
            .ok_or_else(|| ParseError::StackUnderflow(line.to_string()))
    }

    pub fn top(&self) -> Option<&InvocationFrame> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    fn is_executing(&self, program: &str) -> bool {
        matches!(self.top(), Some(InvocationFrame::Program(id)) if id == program)
    }
}

/// The structural meaning of one retained log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLine<'a> {
    Invoke { program: &'a str, depth: u32 },
    Success { program: &'a str },
    /// `Program log: ` text: free-form messages or legacy `msg!` events.
    Log(&'a str),
    /// `Program data: ` payload, as written by `emit!`.
    Data(&'a str),
    Other,
}

impl<'a> LogLine<'a> {
    pub fn classify(line: &'a str) -> Self {
        if let Some(message) = line.strip_prefix(PROGRAM_LOG) {
            return LogLine::Log(message);
        }
        if let Some(payload) = line.strip_prefix(PROGRAM_DATA) {
            return LogLine::Data(payload);
        }
        let Some(rest) = line.strip_prefix(PROGRAM_PREFIX) else {
            return LogLine::Other;
        };
        let mut parts = rest.split(' ');
        match (parts.next(), parts.next(), parts.next(), parts.next()) {
            (Some(program), Some("invoke"), Some(depth), None) => depth
                .strip_prefix('[')
                .and_then(|d| d.strip_suffix(']'))
                .and_then(|d| d.parse().ok())
                .map_or(LogLine::Other, |depth| LogLine::Invoke { program, depth }),
            (Some(program), Some("success"), None, None) => LogLine::Success { program },
            _ => LogLine::Other,
        }
    }

    fn top_level_invoke(line: &'a str) -> Option<&'a str> {
        match Self::classify(line) {
            LogLine::Invoke { program, depth: 1 } => Some(program),
            _ => None,
        }
    }
}

/// Extracts one program's events from log batches.
///
/// Holds no per-batch state, so one parser can serve concurrent batches.
#[derive(Clone)]
pub struct EventParser {
    program_id: Pubkey,
    program: String,
    decoder: EventDecoder,
}

impl EventParser {
    pub fn new(program_id: Pubkey, decoder: EventDecoder) -> Self {
        Self {
            program_id,
            program: program_id.to_string(),
            decoder,
        }
    }

    pub fn program_id(&self) -> &Pubkey {
        &self.program_id
    }

    /// Scans `logs` lazily, stamping every event with `context`.
    pub fn parse<'a, I>(&'a self, logs: I, context: EventContext) -> LogEvents<'a, I::IntoIter>
    where
        I: IntoIterator<Item = &'a str>,
    {
        LogEvents {
            parser: self,
            lines: logs.into_iter().peekable(),
            stack: ExecutionStack::new(),
            context,
            started: false,
            done: false,
            skipped: 0,
        }
    }

    /// Eagerly collects a batch. Stops at the first error that ends the scan.
    pub fn parse_logs<S: AsRef<str>>(
        &self,
        logs: &[S],
        context: EventContext,
    ) -> Result<Vec<ParsedEvent>, ParseError> {
        self.parse(logs.iter().map(AsRef::as_ref), context).collect()
    }
}

/// The event sequence of one batch. Fused: once it yields `None` or an error
/// it stays exhausted.
pub struct LogEvents<'a, I: Iterator<Item = &'a str>> {
    parser: &'a EventParser,
    lines: Peekable<I>,
    stack: ExecutionStack,
    context: EventContext,
    started: bool,
    done: bool,
    skipped: usize,
}

impl<'a, I: Iterator<Item = &'a str>> LogEvents<'a, I> {
    /// Current call depth; zero once a balanced batch has been fully consumed.
    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    /// Per-event errors swallowed so far in lenient mode.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    fn next_line(&mut self) -> Option<&'a str> {
        self.lines.by_ref().find(|l| l.starts_with(PROGRAM_PREFIX))
    }

    fn peek_line(&mut self) -> Option<&'a str> {
        while let Some(line) = self.lines.peek() {
            if line.starts_with(PROGRAM_PREFIX) {
                return Some(*line);
            }
            self.lines.next();
        }
        None
    }

    fn open(&mut self) -> Result<bool, ParseError> {
        let Some(first) = self.next_line() else {
            return Ok(false);
        };
        match LogLine::top_level_invoke(first) {
            Some(program) => {
                self.stack.push(InvocationFrame::Program(program.to_string()));
                Ok(true)
            }
            None if self.parser.decoder.options().strict => {
                Err(ParseError::MalformedLogSequence(first.to_string()))
            }
            None => {
                tracing::debug!("Log batch does not open with a top-level invocation: {}", first);
                Ok(false)
            }
        }
    }

    fn handle_line(&mut self, line: &'a str) -> Result<Option<ParsedEvent>, ParseError> {
        let parser = self.parser;
        let target = parser.program.as_str();
        let decoded = match LogLine::classify(line) {
            LogLine::Log(message) if self.stack.is_executing(target) => {
                parser.decoder.decode_message(message)?
            }
            LogLine::Data(payload) if self.stack.is_executing(target) => {
                parser.decoder.decode(payload)?
            }
            LogLine::Invoke { program, depth } if depth != 1 => {
                let frame = if program == target {
                    InvocationFrame::Program(program.to_string())
                } else {
                    InvocationFrame::Foreign
                };
                self.stack.push(frame);
                None
            }
            LogLine::Success { .. } => {
                self.stack.pop(line)?;
                if let Some(program) = self.peek_line().and_then(LogLine::top_level_invoke) {
                    self.stack.push(InvocationFrame::Program(program.to_string()));
                }
                None
            }
            _ => None,
        };
        Ok(decoded.map(|event| ParsedEvent {
            program_id: parser.program_id,
            event,
            context: self.context.clone(),
        }))
    }
}

impl<'a, I: Iterator<Item = &'a str>> Iterator for LogEvents<'a, I> {
    type Item = Result<ParsedEvent, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if !self.started {
            self.started = true;
            match self.open() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }

        let strict = self.parser.decoder.options().strict;
        while let Some(line) = self.next_line() {
            match self.handle_line(line) {
                Ok(Some(event)) => return Some(Ok(event)),
                Ok(None) => {}
                Err(e) if strict || e.is_fatal() => {
                    if e.is_fatal() {
                        tracing::error!(signature = %self.context.signature, "{}", e);
                    }
                    self.done = true;
                    return Some(Err(e));
                }
                Err(e) => {
                    tracing::debug!(signature = %self.context.signature, "Dropping undecodable event: {}", e);
                    self.skipped += 1;
                }
            }
        }
        self.done = true;
        None
    }
}

impl<'a, I: Iterator<Item = &'a str>> std::iter::FusedIterator for LogEvents<'a, I> {}
