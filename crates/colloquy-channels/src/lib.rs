pub mod slack;
pub mod util;

pub use slack::SlackWebhookPublisher;
