// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use rd_core::{ChannelPayload, JobId, JobState};

fn state_msg(id: &str, from: JobState, to: JobState) -> BusMessage {
    BusMessage::new(JobId::new(id), 1_000, ChannelPayload::State { from, to })
}

#[tokio::test]
async fn all_subscribers_receive_every_message() {
    let bus = EventBus::new();
    let mut a = bus.subscribe();
    let mut b = bus.subscribe();

    bus.publish(state_msg("job-1", JobState::Queued, JobState::Downloading));

    assert_eq!(a.recv().await.unwrap().job_id, "job-1");
    assert_eq!(b.recv().await.unwrap().job_id, "job-1");
}

#[tokio::test]
async fn publish_without_subscribers_is_dropped() {
    let bus = EventBus::new();
    // Must not error or block
    bus.publish(state_msg("job-1", JobState::Queued, JobState::Downloading));
    assert_eq!(bus.subscriber_count(), 0);
}

#[tokio::test]
async fn late_subscriber_misses_earlier_messages() {
    let bus = EventBus::new();
    bus.publish(state_msg("job-1", JobState::Queued, JobState::Downloading));

    let mut rx = bus.subscribe();
    bus.publish(state_msg("job-2", JobState::Queued, JobState::Downloading));

    assert_eq!(rx.recv().await.unwrap().job_id, "job-2");
}

#[tokio::test]
async fn messages_arrive_in_publish_order() {
    let bus = EventBus::new();
    let mut rx = bus.subscribe();

    bus.publish(state_msg("job-1", JobState::Queued, JobState::Downloading));
    bus.publish(state_msg("job-1", JobState::Downloading, JobState::Downloaded));

    let first = rx.recv().await.unwrap();
    let second = rx.recv().await.unwrap();
    assert!(matches!(
        first.payload,
        ChannelPayload::State { to: JobState::Downloading, .. }
    ));
    assert!(matches!(
        second.payload,
        ChannelPayload::State { to: JobState::Downloaded, .. }
    ));
}
