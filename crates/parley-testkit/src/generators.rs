//! Proptest strategies over the core data model, plus the merge laws
//! checked against them.

use proptest::prelude::*;

use parley_core::{Message, MessageRole};

pub fn role() -> impl Strategy<Value = MessageRole> {
    prop_oneof![
        Just(MessageRole::User),
        Just(MessageRole::Assistant),
        Just(MessageRole::System),
    ]
}

pub fn content() -> impl Strategy<Value = String> {
    "[a-z]{1,12}( [a-z]{1,12}){0,4}"
}

/// Timestamps below the `now` the law tests use, so no confirmed
/// message ever looks like a stale pending send.
pub fn timestamp() -> impl Strategy<Value = i64> {
    1_000i64..9_000
}

/// A batch of server-confirmed messages with distinct ids.
pub fn confirmed_batch(conversation_id: &str) -> impl Strategy<Value = Vec<Message>> {
    let conv = conversation_id.to_string();
    prop::collection::vec((role(), content(), timestamp()), 0..12).prop_map(move |raw| {
        raw.into_iter()
            .enumerate()
            .map(|(i, (role, content, at))| {
                Message::confirmed(format!("srv-{i}"), conv.clone(), role, content, at)
                    .expect("generated content is non-empty")
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::{merge, ConversationState, ConversationId, MergeOp, MessageRole};

    const NOW: i64 = 10_000;
    const GRACE: i64 = 5_000;

    fn fresh() -> ConversationState {
        ConversationState::new(ConversationId::new("c1"))
    }

    proptest! {
        #[test]
        fn full_replace_is_idempotent(batch in confirmed_batch("c1")) {
            let mut state = fresh();
            merge(&mut state, MergeOp::FullReplace { messages: batch.clone() }, NOW, GRACE);
            let first = state.messages.clone();

            let outcome = merge(&mut state, MergeOp::FullReplace { messages: batch }, NOW + 1, GRACE);
            prop_assert_eq!(outcome.inserted, 0);
            prop_assert_eq!(&state.messages, &first);
        }

        #[test]
        fn merged_messages_stay_sorted(
            batch in confirmed_batch("c1"),
            extra in confirmed_batch("c1"),
        ) {
            let mut state = fresh();
            merge(&mut state, MergeOp::FullReplace { messages: batch }, NOW, GRACE);
            // Shift ids so the second batch inserts instead of updating.
            let extra: Vec<_> = extra
                .into_iter()
                .enumerate()
                .map(|(i, mut m)| {
                    m.id = format!("push-{i}").into();
                    m
                })
                .collect();
            merge(&mut state, MergeOp::IncrementalAppend { messages: extra }, NOW, GRACE);

            prop_assert!(state
                .messages
                .windows(2)
                .all(|w| w[0].created_at <= w[1].created_at));
        }

        #[test]
        fn ids_stay_unique(batch in confirmed_batch("c1")) {
            let mut state = fresh();
            let doubled: Vec<_> = batch.iter().cloned().chain(batch.clone()).collect();
            merge(&mut state, MergeOp::FullReplace { messages: doubled }, NOW, GRACE);

            let mut ids: Vec<_> = state.messages.iter().map(|m| m.id.clone()).collect();
            ids.sort();
            ids.dedup();
            prop_assert_eq!(ids.len(), state.messages.len());
        }

        #[test]
        fn refresh_and_send_reconciliation_commute(
            batch in confirmed_batch("c1"),
            content in content(),
        ) {
            let provisional =
                Message::provisional("c1", MessageRole::User, content.clone(), NOW - 10)
                    .expect("generated content is non-empty");
            let confirmed =
                Message::confirmed("srv-99", "c1", MessageRole::User, content, NOW - 5)
                    .expect("generated content is non-empty");
            let mut refresh = batch;
            refresh.push(confirmed.clone());

            let mut fetch_first = fresh();
            merge(
                &mut fetch_first,
                MergeOp::OptimisticInsert { message: provisional.clone() },
                NOW - 10,
                GRACE,
            );
            let mut send_first = fetch_first.clone();

            merge(
                &mut fetch_first,
                MergeOp::FullReplace { messages: refresh.clone() },
                NOW,
                GRACE,
            );
            merge(
                &mut fetch_first,
                MergeOp::ReconcileProvisional {
                    provisional_id: provisional.id.clone(),
                    confirmed: confirmed.clone(),
                },
                NOW + 1,
                GRACE,
            );

            merge(
                &mut send_first,
                MergeOp::ReconcileProvisional {
                    provisional_id: provisional.id.clone(),
                    confirmed,
                },
                NOW,
                GRACE,
            );
            merge(
                &mut send_first,
                MergeOp::FullReplace { messages: refresh },
                NOW + 1,
                GRACE,
            );

            prop_assert_eq!(fetch_first.messages, send_first.messages);
        }

        #[test]
        fn echo_in_refresh_consumes_the_provisional(content in content()) {
            let mut state = fresh();
            let provisional =
                Message::provisional("c1", MessageRole::User, content.clone(), NOW)
                    .expect("generated content is non-empty");
            merge(
                &mut state,
                MergeOp::OptimisticInsert { message: provisional },
                NOW,
                GRACE,
            );

            let echo = Message::confirmed("srv-0", "c1", MessageRole::User, content, NOW + 5)
                .expect("generated content is non-empty");
            merge(&mut state, MergeOp::FullReplace { messages: vec![echo] }, NOW + 10, GRACE);

            prop_assert_eq!(state.messages.len(), 1);
            prop_assert!(!state.messages[0].id.is_temporary());
            prop_assert_eq!(state.pending_send_count(), 0);
        }
    }
}
