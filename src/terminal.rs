//! Terminal rendering of conversations and live reviews

use crate::conversation::{ChatMessage, ConversationLog, MessageId, Role};
use crate::review::{ReviewEvent, ReviewObserver};
use crate::session::Theme;
use crossterm::{
    cursor::MoveToColumn,
    queue,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
    terminal::{Clear, ClearType},
};
use std::io::{self, Write};

struct Palette {
    muted: Color,
    text: Color,
    user: Color,
    ai: Color,
    error: Color,
}

fn palette(theme: Theme) -> Palette {
    match theme {
        Theme::Dark => Palette {
            muted: Color::Rgb { r: 140, g: 140, b: 140 },
            text: Color::Rgb { r: 220, g: 220, b: 220 },
            user: Color::Rgb { r: 120, g: 170, b: 255 },
            ai: Color::Rgb { r: 130, g: 210, b: 150 },
            error: Color::Rgb { r: 240, g: 110, b: 110 },
        },
        Theme::Light => Palette {
            muted: Color::Rgb { r: 110, g: 110, b: 110 },
            text: Color::Rgb { r: 30, g: 30, b: 30 },
            user: Color::Rgb { r: 30, g: 80, b: 200 },
            ai: Color::Rgb { r: 20, g: 120, b: 50 },
            error: Color::Rgb { r: 190, g: 30, b: 30 },
        },
    }
}

/// Writes messages as they are appended and the answer as it is revealed.
pub struct TerminalRenderer<W: Write> {
    out: W,
    palette: Palette,
    placeholder_visible: bool,
    /// Answer being revealed and how many bytes of it are printed
    revealing: Option<(MessageId, usize)>,
}

impl TerminalRenderer<io::Stdout> {
    pub fn stdout(theme: Theme) -> Self {
        Self::new(io::stdout(), theme)
    }
}

impl<W: Write> TerminalRenderer<W> {
    pub fn new(out: W, theme: Theme) -> Self {
        Self {
            out,
            palette: palette(theme),
            placeholder_visible: false,
            revealing: None,
        }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    /// Print a whole conversation.
    pub fn print_log(&mut self, log: &ConversationLog) -> io::Result<()> {
        for message in log {
            self.print_message(message)?;
        }
        self.out.flush()
    }

    pub fn print_message(&mut self, message: &ChatMessage) -> io::Result<()> {
        self.header(message)?;
        self.body(message.role, &message.content)?;
        queue!(self.out, Print("\n\n"))
    }

    fn header(&mut self, message: &ChatMessage) -> io::Result<()> {
        let color = match message.role {
            Role::User => self.palette.user,
            Role::Ai => self.palette.ai,
            Role::System => self.palette.muted,
            Role::Error => self.palette.error,
        };
        queue!(
            self.out,
            SetForegroundColor(color),
            SetAttribute(Attribute::Bold),
            Print(message.role.label()),
            SetAttribute(Attribute::Reset),
            SetForegroundColor(self.palette.muted),
            Print(format!("  {}", message.timestamp.format("%H:%M:%S"))),
            ResetColor,
            Print("\n")
        )
    }

    fn body(&mut self, role: Role, content: &str) -> io::Result<()> {
        let color = match role {
            Role::Error => self.palette.error,
            _ => self.palette.text,
        };
        queue!(self.out, SetForegroundColor(color), Print(content), ResetColor)
    }

    fn clear_placeholder(&mut self) -> io::Result<()> {
        if self.placeholder_visible {
            queue!(self.out, MoveToColumn(0), Clear(ClearType::CurrentLine))?;
            self.placeholder_visible = false;
        }
        Ok(())
    }

    /// Terminate a revealed answer that is still open.
    fn close_answer(&mut self) -> io::Result<()> {
        if self.revealing.take().is_some() {
            queue!(self.out, Print("\n\n"))?;
        }
        Ok(())
    }

    fn render(&mut self, event: ReviewEvent<'_>) -> io::Result<()> {
        match event {
            ReviewEvent::Placeholder(frame) => {
                queue!(
                    self.out,
                    MoveToColumn(0),
                    Clear(ClearType::CurrentLine),
                    SetForegroundColor(self.palette.muted),
                    Print(format!("  {}", frame)),
                    ResetColor
                )?;
                self.placeholder_visible = true;
            }
            ReviewEvent::Appended(message) => {
                self.clear_placeholder()?;
                self.close_answer()?;
                if message.role == Role::Ai && message.content.is_empty() {
                    self.header(message)?;
                    self.revealing = Some((message.id, 0));
                } else {
                    self.print_message(message)?;
                }
            }
            ReviewEvent::Revealed { id, content } => {
                let Some((open_id, printed)) = self.revealing else {
                    return Ok(());
                };
                if open_id != id {
                    return Ok(());
                }
                match content.get(printed..) {
                    Some(fresh) => {
                        self.body(Role::Ai, fresh)?;
                        self.revealing = Some((id, content.len()));
                    }
                    // Content was rewritten rather than extended
                    None => {
                        queue!(self.out, Print("\n"))?;
                        self.body(Role::Ai, content)?;
                        self.revealing = Some((id, content.len()));
                    }
                }
            }
        }
        self.out.flush()
    }

    /// Close any open answer line once the review is over.
    pub fn finish(&mut self) -> io::Result<()> {
        self.clear_placeholder()?;
        self.close_answer()?;
        self.out.flush()
    }
}

impl<W: Write> ReviewObserver for TerminalRenderer<W> {
    fn on_event(&mut self, event: ReviewEvent<'_>) {
        if let Err(err) = self.render(event) {
            tracing::debug!(error = %err, "failed to render review output");
        }
    }
}

/// Print a dim status line to stderr, in the style of the other CLI notices.
pub fn print_notice(message: &str) {
    let _ = crossterm::execute!(
        io::stderr(),
        SetForegroundColor(Color::Rgb { r: 140, g: 140, b: 140 }),
        Print(format!("  {}\n", message)),
        ResetColor
    );
}
