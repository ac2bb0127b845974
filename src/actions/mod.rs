pub mod dispatcher;
pub mod http;
pub mod ledger;
pub mod ports;
pub mod template;

pub use dispatcher::{
    ActionDispatcher, ActionExecutionError, ActionRunReport, ActionStatus, DispatchContext,
};
pub use http::{HttpMessageSender, HttpWebhookClient};
pub use ledger::{
    compute_action_correlation_key, compute_auto_reply_correlation_key, SqliteDeliveryLedger,
};
pub use ports::{
    AssignmentOutcome, Attachment, ClaimOutcome, ContactStore, DeliveryLedger, MessageSender,
    OutboundMessage, OutgoingMessageRecord, OutgoingOrigin, PortError, ReplyTemplate,
    SentMessage, WebhookClient,
};
pub use template::{render_reply_template, TemplateError};
