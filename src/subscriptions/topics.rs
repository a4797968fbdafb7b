//! Builders for common topics.
//!
//! Ids are derived from the topic name and its target, so building the same
//! topic twice yields the same id.

use serde_json::{json, Value};

use super::subscription::{Subscription, Transport};

/// Hub topics live under the Helix base URL
const HELIX_TOPIC_BASE: &str = "https://api.twitch.tv/helix";

/// Default lease for hub subscriptions, one day
pub const DEFAULT_LEASE_SECONDS: u64 = 86_400;

fn eventsub<F>(kind: &str, version: &str, user_id: &str, condition: Value, handler: F) -> Subscription
where
    F: Fn(Value) + Send + Sync + 'static,
{
    Subscription::new(
        format!("{}.{}", kind, user_id),
        Transport::EventSub {
            kind: kind.to_string(),
            version: version.to_string(),
            condition,
        },
        handler,
    )
    .with_auth_user_id(user_id)
    .with_transform(|payload| payload.get("event").cloned().unwrap_or(Value::Null))
}

/// New followers of a channel (`channel.follow.<id>`)
pub fn channel_follow<F>(broadcaster_id: &str, handler: F) -> Subscription
where
    F: Fn(Value) + Send + Sync + 'static,
{
    eventsub(
        "channel.follow",
        "2",
        broadcaster_id,
        json!({
            "broadcaster_user_id": broadcaster_id,
            "moderator_user_id": broadcaster_id,
        }),
        handler,
    )
}

/// Channel went live (`stream.online.<id>`)
pub fn stream_online<F>(broadcaster_id: &str, handler: F) -> Subscription
where
    F: Fn(Value) + Send + Sync + 'static,
{
    eventsub(
        "stream.online",
        "1",
        broadcaster_id,
        json!({ "broadcaster_user_id": broadcaster_id }),
        handler,
    )
}

/// Channel went offline (`stream.offline.<id>`)
pub fn stream_offline<F>(broadcaster_id: &str, handler: F) -> Subscription
where
    F: Fn(Value) + Send + Sync + 'static,
{
    eventsub(
        "stream.offline",
        "1",
        broadcaster_id,
        json!({ "broadcaster_user_id": broadcaster_id }),
        handler,
    )
}

/// Title or category changes (`channel.update.<id>`)
pub fn channel_update<F>(broadcaster_id: &str, handler: F) -> Subscription
where
    F: Fn(Value) + Send + Sync + 'static,
{
    eventsub(
        "channel.update",
        "2",
        broadcaster_id,
        json!({ "broadcaster_user_id": broadcaster_id }),
        handler,
    )
}

/// New subscribers (`channel.subscribe.<id>`)
pub fn channel_subscribe<F>(broadcaster_id: &str, handler: F) -> Subscription
where
    F: Fn(Value) + Send + Sync + 'static,
{
    eventsub(
        "channel.subscribe",
        "1",
        broadcaster_id,
        json!({ "broadcaster_user_id": broadcaster_id }),
        handler,
    )
}

/// Legacy hub: follows to a user (`follows.to.<id>`). The handler receives
/// the single follow record.
pub fn follows_to<F>(user_id: &str, lease_seconds: u64, handler: F) -> Subscription
where
    F: Fn(Value) + Send + Sync + 'static,
{
    Subscription::new(
        format!("follows.to.{}", user_id),
        Transport::WebHook {
            topic: format!("{}/users/follows?first=1&to_id={}", HELIX_TOPIC_BASE, user_id),
            lease_seconds,
        },
        handler,
    )
    .with_auth_user_id(user_id)
    .with_transform(first_record)
}

/// Legacy hub: stream changes for a user (`streams.<id>`). The handler
/// receives the stream record, or `null` when the stream went offline.
pub fn stream_changes<F>(user_id: &str, lease_seconds: u64, handler: F) -> Subscription
where
    F: Fn(Value) + Send + Sync + 'static,
{
    Subscription::new(
        format!("streams.{}", user_id),
        Transport::WebHook {
            topic: format!("{}/streams?user_id={}", HELIX_TOPIC_BASE, user_id),
            lease_seconds,
        },
        handler,
    )
    .with_auth_user_id(user_id)
    .with_transform(first_record)
}

fn first_record(payload: Value) -> Value {
    payload
        .get("data")
        .and_then(|data| data.get(0))
        .cloned()
        .unwrap_or(Value::Null)
}
