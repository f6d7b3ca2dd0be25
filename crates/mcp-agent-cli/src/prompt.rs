use anyhow::Result;
use mcp_agent::models::message::Message;

pub mod cliclack;

pub trait Prompt {
    fn render(&mut self, message: Box<Message>);
    /// Show text of a message still being generated
    fn render_delta(&mut self, text: &str);
    fn render_error(&mut self, error: &str);
    fn get_input(&mut self) -> Result<Input>;
    fn show_busy(&mut self);
    fn hide_busy(&mut self);
    fn close(&self);
    fn agent_ready(&self, tool_names: &[&str]) {
        println!();
        if tool_names.is_empty() {
            println!("No tools loaded.");
        } else {
            println!("Loaded tools: {}", tool_names.join(", "));
        }
        println!("Type your question, or \"exit\" to quit.");
        println!();
    }
}

#[derive(Debug, PartialEq)]
pub struct Input {
    pub input_type: InputType,
    pub content: Option<String>, // Optional content as sometimes the user may be issuing a command eg. (Exit)
}

#[derive(Debug, PartialEq)]
pub enum InputType {
    AskAgain, // Ask the user for input again. Control flow command.
    Message,  // User sent a message
    Exit,     // User wants to exit the session
}

pub enum Theme {
    Light,
    Dark,
}

impl Input {
    /// Interpret a raw line typed at the chat prompt
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        let input_type = match text.to_lowercase().as_str() {
            "" => InputType::AskAgain,
            "exit" | "quit" | "/exit" | "/quit" => InputType::Exit,
            _ => InputType::Message,
        };
        let content = (input_type == InputType::Message).then(|| text.to_string());
        Input {
            input_type,
            content,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(
            Input::parse("  What tools do you have? \n"),
            Input {
                input_type: InputType::Message,
                content: Some("What tools do you have?".to_string()),
            }
        );
        assert_eq!(Input::parse("   ").input_type, InputType::AskAgain);
        assert_eq!(Input::parse("EXIT").input_type, InputType::Exit);
        assert_eq!(Input::parse("quit").input_type, InputType::Exit);
        assert_eq!(Input::parse("/quit").content, None);
        assert_eq!(Input::parse("exit now").input_type, InputType::Message);
    }
}
