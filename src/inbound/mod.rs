pub mod contact;
pub mod message;

pub use contact::{Contact, Conversation};
pub use message::{DetectedIntent, InboundMessage, NormalizedMessage, Sentiment, SentimentReading};
