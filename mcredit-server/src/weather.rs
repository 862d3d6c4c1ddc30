//! The demo weather handlers and their registration.
//!
//! | Name | Kind | Credits |
//! |---|---|---|
//! | `weather.today` | tool | 1 |
//! | `weather.today` | resource `weather://today/{city}` | 1 for cities of up to 5 characters, else 2 |
//! | `weather.ensureCity` | prompt | 0 |
//! | `weather.forecast` | streaming tool | 1 per day streamed |
//! | `weather.free` | tool | free |
//!
//! Weather data is synthetic.

use futures_util::StreamExt;
use futures_util::stream;
use mcredit::{CostError, CostSpec, InvocationContext, InvocationDescriptor, PreCallContext};
use mcredit_mcp::{
    CallToolResult, ChunkStream, ContentItem, GetPromptResult, HandlerError, Invocation,
    McpRouter, Paywall, PromptMessage, PromptSpec, ReadResourceResult, ResourceContents,
    ResourceSpec, ToolSpec, UriTemplate,
};
use serde::Serialize;
use serde_json::json;

use crate::error::ServerError;

/// Template of the `weather.today` resource.
pub const TODAY_TEMPLATE: &str = "weather://today/{city}";

const MAX_FORECAST_DAYS: u64 = 7;
const DEFAULT_FORECAST_DAYS: u64 = 3;

/// A snapshot of one day's weather.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TodayWeather {
    /// City name.
    pub city: String,
    /// ISO country code.
    pub country: String,
    /// IANA timezone.
    pub timezone: String,
    /// Current temperature in Celsius.
    pub current_c: f64,
    /// Expected maximum in Celsius.
    pub tmax_c: f64,
    /// Expected minimum in Celsius.
    pub tmin_c: f64,
    /// Precipitation in millimetres.
    pub precipitation_mm: f64,
    /// Human-readable summary.
    pub weather_text: String,
}

/// Trims a user-supplied city and title-cases it.
///
/// ```
/// assert_eq!(mcredit_server::weather::sanitize_city("  san sebastián "), "San Sebastián");
/// ```
#[must_use]
pub fn sanitize_city(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut word_start = true;
    for c in raw.trim().chars() {
        if word_start {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        word_start = !c.is_alphabetic();
    }
    out
}

/// Today's (synthetic) weather for an already sanitized city.
#[must_use]
pub fn today_weather(city: &str) -> TodayWeather {
    TodayWeather {
        city: city.to_owned(),
        country: "ES".to_owned(),
        timezone: "Europe/Madrid".to_owned(),
        current_c: 25.0,
        tmax_c: 30.0,
        tmin_c: 18.0,
        precipitation_mm: 0.0,
        weather_text: "Sunny".to_owned(),
    }
}

fn city_argument(invocation: &Invocation) -> Result<String, HandlerError> {
    let city = sanitize_city(invocation.argument_str("city").unwrap_or_default());
    if city.is_empty() {
        return Err(HandlerError::new("city is required"));
    }
    Ok(city)
}

fn today_uri(city: &str) -> String {
    format!("weather://today/{city}")
}

/// `weather.today` tool: a one-line summary plus a link to the raw JSON.
///
/// # Errors
///
/// Fails when no city is given.
pub async fn today_tool(
    invocation: Invocation,
    _ctx: InvocationContext,
) -> Result<CallToolResult, HandlerError> {
    let city = city_argument(&invocation)?;
    let weather = today_weather(&city);
    Ok(CallToolResult::success(vec![
        ContentItem::text(format!(
            "Weather for {}: {}, {}C.",
            weather.city, weather.weather_text, weather.current_c
        )),
        ContentItem::ResourceLink {
            uri: today_uri(&city),
            name: format!("weather today {city}"),
            mime_type: Some("application/json".to_owned()),
            description: Some("Raw JSON for today's weather".to_owned()),
        },
    ]))
}

/// `weather.today` resource: the raw JSON snapshot.
///
/// # Errors
///
/// Fails when the URI carries no city or the snapshot cannot be encoded.
pub async fn today_resource(
    invocation: Invocation,
    _ctx: InvocationContext,
) -> Result<ReadResourceResult, HandlerError> {
    let city = city_argument(&invocation)?;
    let text = serde_json::to_string(&today_weather(&city))
        .map_err(|e| HandlerError::new("failed to encode weather").with_source(e))?;
    Ok(ReadResourceResult {
        contents: vec![ResourceContents {
            uri: today_uri(&city),
            mime_type: Some("application/json".to_owned()),
            text,
        }],
    })
}

/// Resource price: short city names are cheaper.
///
/// # Errors
///
/// Fails when the city variable is missing.
pub fn resource_credits(pre: &PreCallContext<'_>) -> Result<u64, CostError> {
    let city = pre
        .argument_str("city")
        .map(sanitize_city)
        .ok_or_else(|| CostError::function("city variable missing"))?;
    Ok(if city.chars().count() <= 5 { 1 } else { 2 })
}

/// `weather.ensureCity` prompt: asks the model to call `weather.today`.
///
/// # Errors
///
/// Never fails.
pub async fn ensure_city_prompt(
    invocation: Invocation,
    _ctx: InvocationContext,
) -> Result<GetPromptResult, HandlerError> {
    let city = sanitize_city(invocation.argument_str("city").unwrap_or_default());
    Ok(GetPromptResult {
        description: Some("Ensure a city is provided".to_owned()),
        messages: vec![PromptMessage::user(format!(
            "Please call the tool weather.today with {{ \"city\": \"{city}\" }}"
        ))],
    })
}

/// `weather.forecast` streaming tool: one chunk per day.
#[must_use]
pub fn forecast_stream(invocation: Invocation, _ctx: InvocationContext) -> ChunkStream<String> {
    let city = match city_argument(&invocation) {
        Ok(city) => city,
        Err(e) => return stream::once(async move { Err(e) }).boxed(),
    };
    let days = invocation
        .arguments
        .get("days")
        .and_then(serde_json::Value::as_u64)
        .unwrap_or(DEFAULT_FORECAST_DAYS)
        .clamp(1, MAX_FORECAST_DAYS);

    let weather = today_weather(&city);
    stream::iter(1..=days)
        .map(move |day| {
            Ok(format!(
                "Day {day} in {}: {}, {}-{}C",
                weather.city, weather.weather_text, weather.tmin_c, weather.tmax_c
            ))
        })
        .boxed()
}

/// `weather.free` tool: unmetered summary.
///
/// # Errors
///
/// Never fails.
pub async fn free_tool(invocation: Invocation) -> Result<CallToolResult, HandlerError> {
    let city = sanitize_city(invocation.argument_str("city").unwrap_or_default());
    let weather = today_weather(&city);
    Ok(CallToolResult::text(format!(
        "Weather today in {}: {}, min {}C, max {}C",
        weather.city, weather.weather_text, weather.tmin_c, weather.tmax_c
    )))
}

fn city_schema() -> serde_json::Value {
    json!({
        "type": "object",
        "properties": {"city": {"type": "string"}},
        "required": ["city"],
    })
}

/// Registers the weather handlers.
///
/// `streaming` guards `weather.forecast`. Its cost is only known once the
/// stream ends, so it must not use charge-before-execute.
///
/// # Errors
///
/// Returns [`ServerError`] if a descriptor is rejected by its paywall.
pub fn weather_router(
    paywall: &Paywall,
    streaming: &Paywall,
    version: &str,
) -> Result<McpRouter, ServerError> {
    let today = paywall.wrap(
        today_tool,
        InvocationDescriptor::tool("weather.today", CostSpec::Constant(1)),
    )?;
    let resource = paywall.wrap(
        today_resource,
        InvocationDescriptor::resource("weather.today", CostSpec::pre_call(resource_credits)),
    )?;
    let prompt = paywall.wrap(
        ensure_city_prompt,
        InvocationDescriptor::prompt("weather.ensureCity", CostSpec::Constant(0)),
    )?;
    let forecast = streaming.wrap_stream(
        forecast_stream,
        InvocationDescriptor::tool(
            "weather.forecast",
            CostSpec::post_call(|post| {
                let chunks = post
                    .chunks
                    .ok_or_else(|| CostError::function("chunk count missing"))?;
                u64::try_from(chunks).map_err(|e| CostError::function(e.to_string()))
            }),
        )
        .with_partial_billing(),
    )?;

    Ok(McpRouter::new(paywall.config().server_name.clone(), version)
        .tool(
            ToolSpec::new("weather.today", "Today's Weather").with_input_schema(city_schema()),
            today,
        )
        .stream_tool(
            ToolSpec::new("weather.forecast", "Multi-day forecast, one line per day")
                .with_input_schema(json!({
                    "type": "object",
                    "properties": {
                        "city": {"type": "string"},
                        "days": {"type": "integer", "minimum": 1, "maximum": MAX_FORECAST_DAYS},
                    },
                    "required": ["city"],
                })),
            forecast,
        )
        .free_tool(
            ToolSpec::new("weather.free", "Free Weather").with_input_schema(city_schema()),
            free_tool,
        )
        .resource(
            ResourceSpec::new("weather.today", UriTemplate::parse(TODAY_TEMPLATE)?)
                .with_description("Today's Weather Resource"),
            resource,
        )
        .prompt(
            PromptSpec::new("weather.ensureCity", "Ensure city").with_argument("city", false),
            prompt,
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mcredit::{Arguments, AuthHeaders};

    fn args(value: serde_json::Value) -> Arguments {
        value.as_object().cloned().unwrap()
    }

    fn ctx() -> InvocationContext {
        InvocationContext::from_headers(AuthHeaders::bearer("tok")).unwrap()
    }

    #[test]
    fn sanitizes_cities() {
        assert_eq!(sanitize_city("  madrid "), "Madrid");
        assert_eq!(sanitize_city("NEW YORK"), "New York");
        assert_eq!(sanitize_city("saint-étienne"), "Saint-Étienne");
        assert_eq!(sanitize_city("   "), "");
    }

    #[tokio::test]
    async fn today_tool_summarizes_and_links() {
        let result = today_tool(Invocation::new(args(json!({"city": "madrid"}))), ctx())
            .await
            .unwrap();
        assert_eq!(result.content[0].as_text(), Some("Weather for Madrid: Sunny, 25C."));
        assert!(matches!(
            &result.content[1],
            ContentItem::ResourceLink { uri, name, .. }
                if uri == "weather://today/Madrid" && name == "weather today Madrid"
        ));
    }

    #[tokio::test]
    async fn today_tool_requires_a_city() {
        let err = today_tool(Invocation::new(Arguments::new()), ctx())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "city is required");
    }

    #[tokio::test]
    async fn resource_returns_json_snapshot() {
        let uri = "weather://today/Madrid".parse().unwrap();
        let result = today_resource(Invocation::resource(uri, args(json!({"city": "Madrid"}))), ctx())
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_str(&result.contents[0].text).unwrap();
        assert_eq!(body["tmaxC"], 30.0);
        assert_eq!(body["weatherText"], "Sunny");
        assert_eq!(result.contents[0].uri, "weather://today/Madrid");
    }

    #[test]
    fn resource_price_depends_on_city_length() {
        let ctx = ctx();
        let short = args(json!({"city": "Lyon"}));
        let long = args(json!({"city": "Barcelona"}));
        let price = |arguments: &Arguments| {
            resource_credits(&PreCallContext {
                arguments,
                context: &ctx,
            })
        };
        assert_eq!(price(&short), Ok(1));
        assert_eq!(price(&long), Ok(2));
        assert!(price(&Arguments::new()).is_err());
    }

    #[tokio::test]
    async fn prompt_suggests_the_tool_call() {
        let result = ensure_city_prompt(Invocation::new(args(json!({"city": "paris"}))), ctx())
            .await
            .unwrap();
        assert_eq!(
            result.messages[0].content.as_text(),
            Some(r#"Please call the tool weather.today with { "city": "Paris" }"#)
        );
    }

    #[tokio::test]
    async fn forecast_streams_one_line_per_day() {
        let chunks: Vec<_> = forecast_stream(
            Invocation::new(args(json!({"city": "Madrid", "days": 2}))),
            ctx(),
        )
        .collect()
        .await;
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].as_ref().unwrap(), "Day 2 in Madrid: Sunny, 18-30C");
    }
}
