use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use book_core::{
    ImageChain, ImageContext, ImageModel, ImageSourceError, InferenceEndpoint, InferenceResponse,
    InferenceTier, InlineImage, LanguageModel, LanguageModelError, LogLevel, PlaceholderTier,
    PromptRegistry, Sleeper, StockImageSearch, StockSearchTier, VecLogSink, VisionTier,
};

#[derive(Default)]
struct RecordingSleeper {
    waits: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    fn waits(&self) -> Vec<Duration> {
        self.waits.lock().unwrap().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.waits.lock().unwrap().push(duration);
    }
}

struct ScriptedEndpoint {
    replies: Mutex<VecDeque<Result<InferenceResponse, String>>>,
    fallback: Result<InferenceResponse, String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedEndpoint {
    fn new<I>(replies: I, fallback: Result<InferenceResponse, String>) -> Self
    where
        I: IntoIterator<Item = Result<InferenceResponse, String>>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            fallback,
            calls: Mutex::new(Vec::new()),
        }
    }

    fn failing() -> Self {
        Self::new([], Err("503 Service Unavailable".to_string()))
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl InferenceEndpoint for ScriptedEndpoint {
    fn infer(&self, model_id: &str, _prompt: &str) -> Result<InferenceResponse, ImageSourceError> {
        self.calls.lock().unwrap().push(model_id.to_string());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        reply.map_err(ImageSourceError::Provider)
    }
}

struct FixedSearch(Result<Vec<String>, String>);

impl StockImageSearch for FixedSearch {
    fn search(&self, _query: &str) -> Result<Vec<String>, ImageSourceError> {
        self.0.clone().map_err(ImageSourceError::Provider)
    }
}

struct EchoModel;

impl LanguageModel for EchoModel {
    fn invoke_with_system(
        &self,
        _prompt: &str,
        _system_instruction: Option<&str>,
    ) -> Result<String, LanguageModelError> {
        Ok("A lighthouse keeper staring at a violet storm over black water".to_string())
    }
}

struct SizedRender {
    data_len: usize,
    calls: Mutex<usize>,
}

impl ImageModel for SizedRender {
    fn render(&self, _prompt: &str) -> Result<InlineImage, ImageSourceError> {
        *self.calls.lock().unwrap() += 1;
        Ok(InlineImage {
            mime_type: Some("image/jpeg".to_string()),
            data: "A".repeat(self.data_len),
        })
    }
}

fn png(len: usize) -> InferenceResponse {
    InferenceResponse::Image {
        content_type: "image/png".to_string(),
        bytes: vec![7; len],
    }
}

fn context() -> ImageContext<'static> {
    ImageContext::new("The Archive", "Sci-Fi", "Cinematic")
}

#[test]
fn exhausted_chain_returns_placeholder() {
    let prompts = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();
    let sleeper = Arc::new(RecordingSleeper::default());
    let endpoint = Arc::new(ScriptedEndpoint::failing());
    let render = Arc::new(SizedRender {
        data_len: 10,
        calls: Mutex::new(0),
    });

    let chain = ImageChain::new(PlaceholderTier::default())
        .with_tier(
            VisionTier::new("gemini", Arc::new(EchoModel), render.clone(), &prompts).unwrap(),
        )
        .with_tier(InferenceTier::new("sdxl", endpoint.clone(), "sdxl-base", 2, &prompts).unwrap())
        .with_tier(InferenceTier::new("sd15", endpoint.clone(), "sd-1.5", 1, &prompts).unwrap())
        .with_tier(StockSearchTier::new(
            "lexica",
            Arc::new(FixedSearch(Err("connection refused".to_string()))),
        ))
        .with_sleeper(sleeper.clone());

    let result = chain.acquire(&context(), &sink);

    assert_eq!(result.source, PlaceholderTier::LABEL);
    assert_eq!(result.reference, book_core::imaging::DEFAULT_PLACEHOLDER_URL);
    assert_eq!(*render.calls.lock().unwrap(), 2);
    assert_eq!(endpoint.calls(), ["sdxl-base", "sdxl-base", "sd-1.5"]);
    // one vision retry and one sdxl retry; nothing after a final attempt
    assert_eq!(
        sleeper.waits(),
        [Duration::from_secs(1), Duration::from_secs(2)]
    );
    assert!(sink.contains("Orchestrating visuals (gemini)..."));
    assert!(sink.contains("Fallback 3: lexica..."));
    assert_eq!(
        chain.tier_labels(),
        ["gemini", "sdxl", "sd15", "lexica", PlaceholderTier::LABEL]
    );
}

#[test]
fn first_success_short_circuits_the_chain() {
    let prompts = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();
    let endpoint = Arc::new(ScriptedEndpoint::failing());
    let render = Arc::new(SizedRender {
        data_len: 2048,
        calls: Mutex::new(0),
    });

    let chain = ImageChain::new(PlaceholderTier::default())
        .with_tier(VisionTier::new("gemini", Arc::new(EchoModel), render, &prompts).unwrap())
        .with_tier(InferenceTier::new("sdxl", endpoint.clone(), "sdxl-base", 2, &prompts).unwrap())
        .with_sleeper(Arc::new(RecordingSleeper::default()));

    let result = chain.acquire(&context(), &sink);

    assert_eq!(result.source, "gemini");
    assert!(result.reference.starts_with("data:image/jpeg;base64,"));
    assert!(result.prompt.split_whitespace().count() <= 20);
    assert!(endpoint.calls().is_empty());
    assert!(sink.contains("Visual asset generated successfully."));
}

#[test]
fn warm_up_waits_do_not_consume_attempts() {
    let prompts = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();
    let sleeper = Arc::new(RecordingSleeper::default());
    let endpoint = Arc::new(ScriptedEndpoint::new(
        [
            Ok(InferenceResponse::Loading {
                estimated_secs: Some(5.0),
            }),
            Ok(InferenceResponse::Loading {
                estimated_secs: None,
            }),
            Ok(png(1024)),
        ],
        Err("unexpected extra call".to_string()),
    ));

    let chain = ImageChain::new(PlaceholderTier::default())
        .with_tier(InferenceTier::new("sd15", endpoint.clone(), "sd-1.5", 1, &prompts).unwrap())
        .with_sleeper(sleeper.clone());

    let result = chain.acquire(&context(), &sink);

    assert_eq!(result.source, "sd15");
    assert!(result.reference.starts_with("data:image/png;base64,"));
    assert!(result.prompt.contains("Cinematic style, Sci-Fi concept art, The Archive"));
    assert_eq!(endpoint.calls().len(), 3);
    assert_eq!(
        sleeper.waits(),
        [Duration::from_secs(5), Duration::from_secs(20)]
    );
    assert!(sink.contains("Engine sd-1.5 warming up... 5s"));
}

#[test]
fn endless_warm_up_eventually_counts_as_failure() {
    let prompts = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();
    let sleeper = Arc::new(RecordingSleeper::default());
    let endpoint = Arc::new(ScriptedEndpoint::new(
        [],
        Ok(InferenceResponse::Loading {
            estimated_secs: Some(1.0),
        }),
    ));

    let chain = ImageChain::new(PlaceholderTier::default())
        .with_tier(InferenceTier::new("sdxl", endpoint.clone(), "sdxl-base", 2, &prompts).unwrap())
        .with_sleeper(sleeper.clone());

    let result = chain.acquire(&context(), &sink);

    assert_eq!(result.source, PlaceholderTier::LABEL);
    assert_eq!(endpoint.calls().len(), 5);
    assert_eq!(
        sleeper.waits(),
        [
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(1),
            Duration::from_secs(2),
        ]
    );
}

#[test]
fn tiny_or_foreign_payloads_fall_through() {
    let prompts = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();
    let tiny = Arc::new(ScriptedEndpoint::new([Ok(png(16))], Err("done".into())));
    let html = Arc::new(ScriptedEndpoint::new(
        [Ok(InferenceResponse::Image {
            content_type: "text/html".to_string(),
            bytes: vec![b'<'; 4096],
        })],
        Err("done".into()),
    ));
    let good = Arc::new(ScriptedEndpoint::new([Ok(png(900))], Err("done".into())));

    let chain = ImageChain::new(PlaceholderTier::default())
        .with_tier(InferenceTier::new("tiny", tiny, "tiny-sd", 1, &prompts).unwrap())
        .with_tier(InferenceTier::new("html", html, "broken", 1, &prompts).unwrap())
        .with_tier(InferenceTier::new("good", good, "sd-1.5", 1, &prompts).unwrap())
        .with_sleeper(Arc::new(RecordingSleeper::default()));

    let result = chain.acquire(&context(), &sink);

    assert_eq!(result.source, "good");
    assert!(sink.contains("empty payload"));
    assert!(sink.contains("unexpected content type `text/html`"));
}

#[test]
fn undersized_image_leaves_the_tier_without_retrying() {
    let prompts = PromptRegistry::new().unwrap();
    let sink = VecLogSink::new();
    let sleeper = Arc::new(RecordingSleeper::default());
    let sdxl = Arc::new(ScriptedEndpoint::new([Ok(png(16))], Ok(png(900))));
    let fallback = Arc::new(ScriptedEndpoint::new([Ok(png(900))], Err("done".into())));

    let chain = ImageChain::new(PlaceholderTier::default())
        .with_tier(InferenceTier::new("sdxl", sdxl.clone(), "sdxl-base", 2, &prompts).unwrap())
        .with_tier(InferenceTier::new("sd15", fallback.clone(), "sd-1.5", 1, &prompts).unwrap())
        .with_sleeper(sleeper.clone());

    let result = chain.acquire(&context(), &sink);

    assert_eq!(result.source, "sd15");
    assert_eq!(sdxl.calls(), ["sdxl-base"]);
    assert_eq!(fallback.calls(), ["sd-1.5"]);
    assert!(sleeper.waits().is_empty());
    assert!(sink.contains("sdxl: generation returned an empty payload"));
}

#[test]
fn stock_search_errors_stay_quiet() {
    let sink = VecLogSink::new();
    let chain = ImageChain::new(PlaceholderTier::new("https://cdn.example/fallback.png"))
        .with_tier(StockSearchTier::new(
            "lexica",
            Arc::new(FixedSearch(Err("dns failure".to_string()))),
        ));

    let result = chain.acquire(&context(), &sink);

    assert_eq!(result.reference, "https://cdn.example/fallback.png");
    let dns_records: Vec<_> = sink
        .records()
        .into_iter()
        .filter(|record| record.message.contains("dns failure"))
        .collect();
    assert_eq!(dns_records.len(), 1);
    assert_eq!(dns_records[0].level, LogLevel::Debug);
}

#[test]
fn stock_search_uses_first_non_empty_hit() {
    let sink = VecLogSink::new();
    let chain = ImageChain::new(PlaceholderTier::default()).with_tier(StockSearchTier::new(
        "lexica",
        Arc::new(FixedSearch(Ok(vec![
            "  ".to_string(),
            "https://lexica.example/a.jpg".to_string(),
            "https://lexica.example/b.jpg".to_string(),
        ]))),
    ));

    let result = chain.acquire(&context(), &sink);

    assert_eq!(result.reference, "https://lexica.example/a.jpg");
    assert_eq!(result.prompt, book_core::imaging::PROMPT_STOCK_LIBRARY);
    assert_eq!(result.source, "lexica");
}
