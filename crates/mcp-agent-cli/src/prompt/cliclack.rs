use std::io::{self, Write};

use anyhow::Result;
use bat::WrappingMode;
use cliclack::{input, spinner};
use console::style;
use mcp_agent::models::message::{Message, MessageContent};

use super::{Input, InputType, Prompt, Theme};

pub struct CliclackPrompt {
    spinner: cliclack::ProgressBar,
    busy: bool,
    // A streamed reply is waiting for its line to be ended
    mid_line: bool,
    input_mode: InputMode,
    theme: Theme,
}

enum InputMode {
    Singleline,
    Multiline,
}

impl CliclackPrompt {
    pub fn new() -> Self {
        CliclackPrompt {
            spinner: spinner(),
            busy: false,
            mid_line: false,
            input_mode: InputMode::Singleline,
            theme: Theme::Dark,
        }
    }

    fn theme_name(&self) -> &'static str {
        match self.theme {
            Theme::Light => "GitHub",
            Theme::Dark => "zenburn",
        }
    }
}

impl Default for CliclackPrompt {
    fn default() -> Self {
        Self::new()
    }
}

fn print_tool_request(content: &str, theme: &str, tool_name: &str) {
    println!("{}", style(format!("[Calling tool: {}]", tool_name)).cyan());
    let printed = bat::PrettyPrinter::new()
        .input(bat::Input::from_bytes(content.as_bytes()).name("Arguments"))
        .theme(theme)
        .language("JSON")
        .grid(true)
        .header(true)
        .wrapping_mode(WrappingMode::Character)
        .print();
    if printed.is_err() {
        println!("{}", content);
    }
}

fn print(content: &str, theme: &str) {
    let printed = bat::PrettyPrinter::new()
        .input(bat::Input::from_bytes(content.as_bytes()))
        .theme(theme)
        .language("Markdown")
        .wrapping_mode(WrappingMode::Character)
        .print();
    if printed.is_err() {
        println!("{}", content);
    }
}

fn print_newline() {
    println!();
}

impl Prompt for CliclackPrompt {
    fn render(&mut self, message: Box<Message>) {
        if std::mem::take(&mut self.mid_line) {
            print_newline();
        }
        let theme = self.theme_name();

        for message_content in &message.content {
            match message_content {
                MessageContent::Text(text) => print(&text.text, theme),
                MessageContent::ToolRequest(tool_request) => match &tool_request.tool_call {
                    Ok(call) => {
                        let arguments = serde_json::to_string_pretty(&call.arguments)
                            .unwrap_or_else(|_| call.arguments.to_string());
                        print_tool_request(&arguments, theme, &call.name);
                    }
                    Err(e) => println!("{}", style(format!("[Invalid tool call: {}]", e)).red()),
                },
                MessageContent::ToolResponse(tool_response) => match &tool_response.tool_result {
                    Ok(_) => println!("{}", style("[Tool completed]").dim()),
                    Err(e) => println!("{}", style(format!("[Tool failed: {}]", e)).red()),
                },
            }
        }

        print_newline();
        let _ = io::stdout().flush();
    }

    fn render_delta(&mut self, text: &str) {
        print!("{}", text);
        let _ = io::stdout().flush();
        self.mid_line = true;
    }

    fn render_error(&mut self, error: &str) {
        eprintln!("{} {}", style("Error:").red().bold(), error);
    }

    fn show_busy(&mut self) {
        self.spinner = spinner();
        self.spinner.start("awaiting reply");
        self.busy = true;
    }

    fn hide_busy(&mut self) {
        if self.busy {
            self.spinner.stop("");
            self.busy = false;
        }
    }

    fn get_input(&mut self) -> Result<Input> {
        let mut input = input("You:").placeholder("").required(false);
        if let InputMode::Multiline = self.input_mode {
            input = input.multiline();
        }
        let message_text: String = match input.interact() {
            Ok(text) => text,
            // Ctrl-C at the prompt ends the session
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {
                return Ok(Input {
                    input_type: InputType::Exit,
                    content: None,
                })
            }
            Err(e) => return Err(e.into()),
        };
        let message_text = message_text.trim();

        if message_text.eq_ignore_ascii_case("/m") {
            self.input_mode = InputMode::Multiline;
            return self.get_input();
        } else if message_text.eq_ignore_ascii_case("/s") {
            self.input_mode = InputMode::Singleline;
            return self.get_input();
        } else if message_text.eq_ignore_ascii_case("/t") {
            self.theme = match self.theme {
                Theme::Light => {
                    println!("Switching to Dark theme");
                    Theme::Dark
                }
                Theme::Dark => {
                    println!("Switching to Light theme");
                    Theme::Light
                }
            };
            return self.get_input();
        } else if message_text.eq_ignore_ascii_case("/?") {
            println!("Commands:");
            println!("exit, quit - Exit the session");
            println!("/m - Switch to multiline input mode");
            println!("/s - Switch to singleline input mode");
            println!("/t - Toggle Light/Dark theme");
            println!("/? - Display this help message");
            println!("Ctrl+C - Interrupt the agent (resets the conversation to before the interrupted message)");
            return self.get_input();
        }

        Ok(Input::parse(message_text))
    }

    fn close(&self) {
        // No cleanup required
    }
}
