use super::{decode, send, GatewayError, GatewayRequest, Provider};
use serde::{Deserialize, Serialize};

const OPENAI_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Short, stable system prompt to keep answers tidy
const SYSTEM_PROMPT: &str =
    "You are a senior code reviewer. Prefer bullet points, small code snippets, and actionable steps.";

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: MessageContent,
}

#[derive(Deserialize)]
struct MessageContent {
    #[serde(default)]
    content: Option<String>,
}

fn request_body<'a>(model: &'a str, prompt: &'a str) -> ChatRequest<'a> {
    ChatRequest {
        model,
        messages: vec![
            Message {
                role: "system",
                content: SYSTEM_PROMPT,
            },
            Message {
                role: "user",
                content: prompt,
            },
        ],
        temperature: 0.2,
    }
}

fn parse_answer(text: &str) -> Result<String, GatewayError> {
    let parsed: ChatResponse = decode(Provider::OpenAi, text)?;
    Ok(parsed
        .choices
        .into_iter()
        .next()
        .and_then(|c| c.message.content)
        .unwrap_or_default())
}

pub(super) async fn complete(
    client: &reqwest::Client,
    request: &GatewayRequest,
) -> Result<String, GatewayError> {
    let builder = client
        .post(OPENAI_URL)
        .header("Content-Type", "application/json")
        .header("Authorization", format!("Bearer {}", request.credential))
        .json(&request_body(&request.model, &request.prompt));
    let text = send(Provider::OpenAi, builder).await?;
    parse_answer(&text)
}
