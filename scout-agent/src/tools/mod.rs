use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),
    #[error("Request failed: {0}")]
    RequestFailed(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Duplicate tool: {0}")]
    DuplicateTool(String),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
}

pub trait Tool: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn invoke(&self, input: String) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + Sync>>;
}

/// Holds the fixed tool set for a run. Registration order is preserved and
/// drives the catalog text rendered into every prompt.
pub struct ToolRegistry {
    tools: Vec<Box<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: Box<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RegistryError::DuplicateTool(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Result<&dyn Tool, RegistryError> {
        self.index
            .get(name)
            .map(|&i| self.tools[i].as_ref())
            .ok_or_else(|| RegistryError::UnknownTool(name.to_string()))
    }

    pub fn describe_all(&self) -> Vec<(String, String)> {
        self.tools
            .iter()
            .map(|tool| (tool.name().to_string(), tool.description().to_string()))
            .collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.iter().map(|tool| tool.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Google search via SerpAPI.
#[derive(Debug)]
pub struct SearchTool {
    api_key: String,
    location: String,
    client: reqwest::Client,
}

impl SearchTool {
    pub fn new(api_key: String) -> Self {
        Self::with_location(api_key, "United States".to_string())
    }

    pub fn with_location(api_key: String, location: String) -> Self {
        Self {
            api_key,
            location,
            client: reqwest::Client::new(),
        }
    }
}

impl Tool for SearchTool {
    fn name(&self) -> &str {
        "search"
    }

    fn description(&self) -> &str {
        "A search engine. Useful for when you need to answer questions about current events. Input should be a search query."
    }

    fn invoke(&self, input: String) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + Sync>> {
        let api_key = self.api_key.clone();
        let location = self.location.clone();
        let client = self.client.clone();
        Box::pin(async move {
            if api_key.is_empty() {
                return Ok("Error: SERP_API_KEY is not configured".to_string());
            }

            debug!(query = %input, "running web search");

            let response = client
                .get("https://serpapi.com/search")
                .query(&[
                    ("engine", "google"),
                    ("q", input.as_str()),
                    ("location", location.as_str()),
                    ("api_key", api_key.as_str()),
                ])
                .timeout(Duration::from_secs(10))
                .send()
                .await
                .map_err(|e| ToolError::RequestFailed(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                return Ok(format!("Error: search API returned {}", status));
            }

            let data: Value = response
                .json()
                .await
                .map_err(|e| ToolError::RequestFailed(e.to_string()))?;

            Ok(render_search_results(&input, &data))
        })
    }
}

fn render_search_results(query: &str, data: &Value) -> String {
    if let Some(answer) = data
        .get("answer_box")
        .and_then(|b| b.get("answer").or_else(|| b.get("snippet")))
        .and_then(Value::as_str)
    {
        return answer.to_string();
    }

    let mut lines = Vec::new();

    if let Some(graph) = data.get("knowledge_graph").and_then(Value::as_object) {
        for key in ["title", "type", "phone", "address", "website", "description"] {
            if let Some(value) = graph.get(key).and_then(Value::as_str) {
                lines.push(format!("{}: {}", key, value));
            }
        }
    }

    if let Some(results) = data.get("organic_results").and_then(Value::as_array) {
        for (i, item) in results.iter().take(5).enumerate() {
            let title = item.get("title").and_then(Value::as_str).unwrap_or("");
            let snippet = item.get("snippet").and_then(Value::as_str).unwrap_or("");
            lines.push(format!("{}. {} - {}", i + 1, title, snippet));
        }
    }

    if lines.is_empty() {
        return format!("No good search result found for: {}", query);
    }

    lines.join("\n")
}

/// Arithmetic expression evaluator.
#[derive(Debug)]
pub struct CalculatorTool;

impl CalculatorTool {
    pub fn new() -> Self {
        Self
    }
}

impl Default for CalculatorTool {
    fn default() -> Self {
        Self::new()
    }
}

impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Useful for getting the result of a math expression. The input to this tool should be a valid mathematical expression that could be executed by a simple calculator."
    }

    fn invoke(&self, input: String) -> Pin<Box<dyn Future<Output = Result<String, ToolError>> + Send + Sync>> {
        Box::pin(async move {
            let value = evaluate_expression(&input)?;
            Ok(format_number(value))
        })
    }
}

fn evaluate_expression(input: &str) -> Result<f64, ToolError> {
    let mut cursor = ExprCursor::new(input);
    let value = cursor.expr()?;
    if let Some(c) = cursor.peek() {
        return Err(ToolError::InvalidExpression(format!(
            "unexpected character '{}' at position {}",
            c as char, cursor.pos
        )));
    }
    Ok(value)
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

// Grammar: expr := term (('+'|'-') term)*
//          term := factor (('*'|'/') factor)*
//          factor := unary ('^' factor)?
//          unary := '-' unary | number | '(' expr ')'
struct ExprCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ExprCursor<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            bytes: input.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&mut self) -> Option<u8> {
        while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
        self.bytes.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64, ToolError> {
        let mut value = self.term()?;
        loop {
            match self.peek() {
                Some(b'+') => {
                    self.pos += 1;
                    value += self.term()?;
                }
                Some(b'-') => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => return Ok(value),
            }
        }
    }

    fn term(&mut self) -> Result<f64, ToolError> {
        let mut value = self.factor()?;
        loop {
            match self.peek() {
                Some(b'*') => {
                    self.pos += 1;
                    value *= self.factor()?;
                }
                Some(b'/') => {
                    self.pos += 1;
                    let divisor = self.factor()?;
                    if divisor == 0.0 {
                        return Err(ToolError::InvalidExpression("division by zero".to_string()));
                    }
                    value /= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    fn factor(&mut self) -> Result<f64, ToolError> {
        let base = self.unary()?;
        if self.peek() == Some(b'^') {
            self.pos += 1;
            let exponent = self.factor()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<f64, ToolError> {
        match self.peek() {
            Some(b'-') => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some(b'(') => {
                self.pos += 1;
                let value = self.expr()?;
                if self.peek() != Some(b')') {
                    return Err(ToolError::InvalidExpression(
                        "missing closing parenthesis".to_string(),
                    ));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == b'.' => self.number(),
            Some(c) => Err(ToolError::InvalidExpression(format!(
                "unexpected character '{}' at position {}",
                c as char, self.pos
            ))),
            None => Err(ToolError::InvalidExpression(
                "unexpected end of expression".to_string(),
            )),
        }
    }

    fn number(&mut self) -> Result<f64, ToolError> {
        let start = self.pos;
        while self
            .bytes
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_digit() || *c == b'.')
        {
            self.pos += 1;
        }
        let text = std::str::from_utf8(&self.bytes[start..self.pos])
            .map_err(|_| ToolError::InvalidExpression("not a number".to_string()))?;
        text.parse::<f64>()
            .map_err(|_| ToolError::InvalidExpression(format!("'{}' is not a number", text)))
    }
}

pub fn default_tools(serp_api_key: Option<String>) -> Result<ToolRegistry, RegistryError> {
    let mut registry = ToolRegistry::new();
    registry.register(Box::new(SearchTool::new(serp_api_key.unwrap_or_default())))?;
    registry.register(Box::new(CalculatorTool::new()))?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_preserves_order() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(SearchTool::new(String::new()))).expect("register");
        registry.register(Box::new(CalculatorTool::new())).expect("register");

        let catalog = registry.describe_all();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog[0].0, "search");
        assert_eq!(catalog[1].0, "calculator");
        assert_eq!(registry.names(), vec!["search", "calculator"]);
    }

    #[test]
    fn test_register_duplicate() {
        let mut registry = ToolRegistry::new();
        registry.register(Box::new(CalculatorTool::new())).expect("register");

        let err = registry.register(Box::new(CalculatorTool::new())).unwrap_err();
        assert_eq!(err, RegistryError::DuplicateTool("calculator".to_string()));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = ToolRegistry::new();
        let err = registry.lookup("nonexistent").unwrap_err();
        assert_eq!(err, RegistryError::UnknownTool("nonexistent".to_string()));
    }

    #[test]
    fn test_describe_all_idempotent() {
        let registry = default_tools(None).expect("default tools");
        assert_eq!(registry.describe_all(), registry.describe_all());
    }

    #[tokio::test]
    async fn test_calculator_precedence() {
        let tool = CalculatorTool::new();
        assert_eq!(tool.invoke("2 + 3 * 4".to_string()).await.expect("eval"), "14");
        assert_eq!(tool.invoke("(2 + 3) * 4".to_string()).await.expect("eval"), "20");
        assert_eq!(tool.invoke("7 / 2".to_string()).await.expect("eval"), "3.5");
        assert_eq!(tool.invoke("-3 + 5".to_string()).await.expect("eval"), "2");
        assert_eq!(tool.invoke("2 ^ 3 ^ 2".to_string()).await.expect("eval"), "512");
    }

    #[tokio::test]
    async fn test_calculator_rejects_garbage() {
        let tool = CalculatorTool::new();
        assert!(tool.invoke("what is 2 + 2".to_string()).await.is_err());
        assert!(tool.invoke("1 / 0".to_string()).await.is_err());
        assert!(tool.invoke("(1 + 2".to_string()).await.is_err());
    }

    #[test]
    fn test_render_answer_box() {
        let data = json!({
            "answer_box": { "answer": "42" },
            "organic_results": [{ "title": "ignored", "snippet": "ignored" }]
        });
        assert_eq!(render_search_results("meaning of life", &data), "42");
    }

    #[test]
    fn test_render_organic_results() {
        let data = json!({
            "organic_results": [
                { "title": "Acme Corp", "snippet": "Call 555-0100" },
                { "title": "Acme on Maps", "snippet": "New York, NY" }
            ]
        });
        let rendered = render_search_results("acme", &data);
        assert!(rendered.contains("1. Acme Corp - Call 555-0100"));
        assert!(rendered.contains("2. Acme on Maps - New York, NY"));
    }

    #[test]
    fn test_render_no_results() {
        let data = json!({});
        assert_eq!(
            render_search_results("acme", &data),
            "No good search result found for: acme"
        );
    }
}
