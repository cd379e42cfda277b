use super::{decode, send, GatewayError, GatewayRequest, Provider};
use serde::{Deserialize, Serialize};
use url::Url;

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models/";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content<'a> {
    role: &'a str,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

/// `.../models/<model>:generateContent?key=<credential>`, with the key
/// query-encoded.
fn endpoint(model: &str, credential: &str) -> Result<Url, GatewayError> {
    let mut url = Url::parse(GEMINI_BASE_URL)
        // "./" keeps `<model>:` from being read as a URL scheme
        .and_then(|base| base.join(&format!("./{}:generateContent", model)))
        .map_err(|e| GatewayError::Transport {
            provider: Provider::Gemini,
            message: format!("invalid endpoint: {}", e),
        })?;
    url.query_pairs_mut().append_pair("key", credential);
    Ok(url)
}

fn request_body(prompt: &str) -> GenerateRequest<'_> {
    GenerateRequest {
        contents: vec![Content {
            role: "user",
            parts: vec![Part { text: prompt }],
        }],
        generation_config: GenerationConfig { temperature: 0.2 },
    }
}

fn parse_answer(text: &str) -> Result<String, GatewayError> {
    let parsed: GenerateResponse = decode(Provider::Gemini, text)?;
    Ok(parsed
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default())
}

pub(super) async fn complete(
    client: &reqwest::Client,
    request: &GatewayRequest,
) -> Result<String, GatewayError> {
    let url = endpoint(&request.model, &request.credential)?;
    let builder = client
        .post(url)
        .header("Content-Type", "application/json")
        .json(&request_body(&request.prompt));
    let text = send(Provider::Gemini, builder).await?;
    parse_answer(&text)
}
