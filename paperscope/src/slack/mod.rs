//! Slack delivery: mrkdwn formatting, size-bounded chunking and the Web API client.

pub mod chunk;
pub mod client;
pub mod format;

pub use chunk::split_message;
pub use client::{deliver_segments, send_error_notification, DeliveryReport, MessageSink, SlackClient};
pub use format::{banner, compose_message, error_notice, format_for_slack};
