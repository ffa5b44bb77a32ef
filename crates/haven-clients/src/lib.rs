pub mod api;
pub mod error;
pub mod nominatim;
pub mod openai;
pub mod stats;
pub mod tavily;
pub mod twilio;

pub use api::{
    ChatApi, ChatRequest, ChatResponse, ChatRole, ChatTurn, GeocodeApi, SearchApi, SearchHit,
    SearchOptions, SearchResponse, SmsApi, SmsReceipt, Speech, SpeechApi, TranscribeApi,
};
pub use error::{ClientError, Result};
pub use nominatim::NominatimClient;
pub use openai::OpenAiClient;
pub use stats::ServiceStats;
pub use tavily::TavilyClient;
pub use twilio::TwilioSms;
