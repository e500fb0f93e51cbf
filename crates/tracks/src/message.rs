//! Wire payload construction.
//!
//! Property bags are flattened into one level of lower-cased, string-valued
//! keys. Device and user attributes shared by every event of a batch go into
//! the common block once; an event only repeats one when its value differs.

use crate::env::DeviceInfoProvider;
use crate::types::{Event, FlatMap, IdentityKind, Properties, RecordPayload};
use tracing::{error, warn};

const USER_INFO_PREFIX: &str = "user_info_";
const DEVICE_INFO_PREFIX: &str = "device_info_";

const EVENT_NAME: &str = "_en";
const USER_AGENT: &str = "_via_ua";
const TIMESTAMP: &str = "_ts";
const USER_TYPE: &str = "_ut";
const ANON_ID: &str = "_ui";
const USERNAME: &str = "_ul";

/// Build the properties shared by every event of one send.
///
/// Sources are applied in order (immutable device info, mutable device info,
/// user properties), so later ones win on key collisions.
pub fn build_common_properties(
    device_info: &dyn DeviceInfoProvider,
    user_properties: Option<&Properties>,
) -> FlatMap {
    let mut common = FlatMap::new();
    flatten_into(
        &device_info.immutable_info(),
        DEVICE_INFO_PREFIX,
        &mut common,
        None,
    );
    flatten_into(
        &device_info.mutable_info(),
        DEVICE_INFO_PREFIX,
        &mut common,
        None,
    );
    if let Some(props) = user_properties {
        flatten_into(props, USER_INFO_PREFIX, &mut common, None);
    }
    common
}

/// Build the flattened map for a single event.
///
/// Returns `None` when a required field is missing; the event is then left
/// out of the batch.
pub fn build_event_payload(event: &Event, common: &FlatMap) -> Option<FlatMap> {
    if event.name().is_empty() {
        error!("cannot write event without a name");
        return None;
    }
    if event.user().is_empty() {
        error!(event = %event.name(), "cannot write event without a user");
        return None;
    }

    let mut payload = FlatMap::new();
    payload.insert(EVENT_NAME.into(), event.name().into());
    payload.insert(USER_AGENT.into(), event.user_agent().into());
    payload.insert(TIMESTAMP.into(), event.timestamp().to_string());

    match event.identity() {
        IdentityKind::Anonymous => {
            payload.insert(USER_TYPE.into(), "anon".into());
            payload.insert(ANON_ID.into(), event.user().into());
        }
        IdentityKind::Authenticated => {
            payload.insert(USERNAME.into(), event.user().into());
        }
    }

    if let Some(props) = event.user_properties() {
        flatten_into(props, USER_INFO_PREFIX, &mut payload, Some(common));
    }
    if let Some(props) = event.device_info() {
        flatten_into(props, DEVICE_INFO_PREFIX, &mut payload, Some(common));
    }
    if let Some(props) = event.custom_properties() {
        for (key, value) in props {
            let key = key.to_lowercase();
            if is_reserved_key(&key) {
                warn!(key = %key, "skipping custom property with reserved prefix");
                continue;
            }
            payload.insert(key, value.to_string());
        }
    }

    Some(payload)
}

/// Assemble the request body for a batch.
///
/// Returns the payload together with the events that made it in, in order.
/// Events whose payload could not be built are dropped here.
pub fn build_record_payload(
    events: Vec<Event>,
    device_info: &dyn DeviceInfoProvider,
    user_properties: Option<&Properties>,
) -> (RecordPayload, Vec<Event>) {
    let common_props = build_common_properties(device_info, user_properties);

    let mut sent = Vec::with_capacity(events.len());
    let mut wire = Vec::with_capacity(events.len());
    for event in events {
        match build_event_payload(&event, &common_props) {
            Some(payload) => {
                wire.push(payload);
                sent.push(event);
            }
            None => warn!(event = %event.name(), "dropping event from batch"),
        }
    }

    (
        RecordPayload {
            events: wire,
            common_props,
        },
        sent,
    )
}

/// Keys owned by required fields or by the source-prefixed properties.
fn is_reserved_key(key: &str) -> bool {
    key.starts_with('_') || key.starts_with(USER_INFO_PREFIX) || key.starts_with(DEVICE_INFO_PREFIX)
}

/// Flatten `props` into `target` under `prefix`.
///
/// With `common`, a key is only written when the common block lacks it or
/// holds a different value.
fn flatten_into(props: &Properties, prefix: &str, target: &mut FlatMap, common: Option<&FlatMap>) {
    for (key, value) in props {
        let flat_key = format!("{}{}", prefix, key).to_lowercase();
        let flat_value = value.to_string();

        let in_common = common.and_then(|c| c.get(&flat_key));
        if in_common != Some(&flat_value) {
            target.insert(flat_key, flat_value);
        }
    }
}
