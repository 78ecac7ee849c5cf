use std::fmt;
use std::io::Write;
use std::path::PathBuf;

use crate::chat::{Message, Role, TurnRenderer};

pub const HELP_TEXT: &str = "\
Type a message and press enter. Mention \"draw\", \"picture of\", \"visualize\" and
similar phrases to get an image instead of a text reply.

Commands:
  /upload <path>   attach a png, jpg, gif or webp image to your next message
  /model [id]      show or switch the chat model for this session
  /history         print the conversation so far
  /new             start a fresh session
  /help            show this help
  /quit            leave (also /exit)";

/// One line of terminal input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Empty,
    Prompt(String),
    Upload(PathBuf),
    Model(Option<String>),
    History,
    New,
    Help,
    Quit,
    Unknown(String),
}

pub fn parse_command(line: &str) -> Command {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Command::Empty;
    }

    let Some(slash_tail) = trimmed.strip_prefix('/') else {
        return Command::Prompt(trimmed.to_string());
    };

    let command_len = slash_tail
        .chars()
        .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
        .count();
    if command_len == 0 {
        return Command::Prompt(trimmed.to_string());
    }

    let command = slash_tail[..command_len].to_ascii_lowercase();
    let arg = slash_tail[command_len..].trim();

    match command.as_str() {
        "upload" if !arg.is_empty() => Command::Upload(PathBuf::from(unquote(arg))),
        "model" if arg.is_empty() => Command::Model(None),
        "model" => Command::Model(Some(arg.to_string())),
        "history" => Command::History,
        "new" => Command::New,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => Command::Unknown(command),
    }
}

// Paths dragged into a terminal often arrive quoted.
fn unquote(arg: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = arg
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner;
        }
    }
    arg
}

/// Renders turns as plain text lines, flushing after each streamed fragment.
pub struct TerminalRenderer<W: Write> {
    out: W,
    streaming: bool,
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W) -> Self {
        Self {
            out,
            streaming: false,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn input_prompt(&mut self) {
        self.emit(format_args!("you> "));
    }

    pub fn notice(&mut self, text: &str) {
        self.end_stream_line();
        self.emit(format_args!("{text}\n"));
    }

    pub fn message(&mut self, message: &Message) {
        let speaker = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
        };
        self.emit(format_args!("{speaker}> {}\n", message.display_text()));
    }

    fn end_stream_line(&mut self) {
        if self.streaming {
            self.streaming = false;
            self.emit(format_args!("\n"));
        }
    }

    fn emit(&mut self, args: fmt::Arguments<'_>) {
        let result = self
            .out
            .write_fmt(args)
            .and_then(|()| self.out.flush());
        if let Err(error) = result {
            tracing::debug!(error = %error, "failed to write to terminal");
        }
    }
}

impl<W: Write> TurnRenderer for TerminalRenderer<W> {
    fn status(&mut self, text: &str) {
        self.end_stream_line();
        self.emit(format_args!("assistant> {text}\n"));
    }

    fn fragment(&mut self, text: &str) {
        if !self.streaming {
            self.streaming = true;
            self.emit(format_args!("assistant> "));
        }
        self.emit(format_args!("{text}"));
    }

    fn image(&mut self, url: &str) {
        self.end_stream_line();
        self.emit(format_args!("assistant> Here's your image: {url}\n"));
    }

    fn failure(&mut self, notice: &str) {
        self.end_stream_line();
        self.emit(format_args!("error: {notice}\n"));
    }

    fn finish(&mut self) {
        self.end_stream_line();
    }
}
