use super::{decode, send, GatewayError, GatewayRequest, Provider};
use serde::{Deserialize, Serialize};

const ANTHROPIC_URL: &str = "https://api.anthropic.com/v1/messages";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1024;

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<Message<'a>>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

fn request_body<'a>(model: &'a str, prompt: &'a str) -> MessagesRequest<'a> {
    MessagesRequest {
        model,
        max_tokens: MAX_TOKENS,
        messages: vec![Message {
            role: "user",
            content: prompt,
        }],
    }
}

/// Concatenate the text blocks, skipping any without text.
fn parse_answer(text: &str) -> Result<String, GatewayError> {
    let parsed: MessagesResponse = decode(Provider::Anthropic, text)?;
    Ok(parsed.content.into_iter().filter_map(|b| b.text).collect())
}

pub(super) async fn complete(
    client: &reqwest::Client,
    request: &GatewayRequest,
) -> Result<String, GatewayError> {
    let builder = client
        .post(ANTHROPIC_URL)
        .header("content-type", "application/json")
        .header("x-api-key", &request.credential)
        .header("anthropic-version", ANTHROPIC_VERSION)
        .json(&request_body(&request.model, &request.prompt));
    let text = send(Provider::Anthropic, builder).await?;
    parse_answer(&text)
}
