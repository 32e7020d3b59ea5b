//! Conflict resolution: apply the entity's strategy to a detected conflict.

use serde_json::Value;

use sitesafe_core::ConflictStrategy;

/// What to do with a conflicting mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Drop the mutation; the server copy stands.
    Skip { reason: String },
    /// Replay with this body.
    Proceed { body: Value },
}

/// Apply `strategy` to a conflict between the queued `client_body` and the
/// fresher `server_entity`.
pub fn resolve(strategy: ConflictStrategy, client_body: &Value, server_entity: &Value) -> Resolution {
    match strategy {
        ConflictStrategy::ServerWins => Resolution::Skip {
            reason: "server copy is newer".to_owned(),
        },
        ConflictStrategy::ClientWins => Resolution::Proceed {
            body: client_body.clone(),
        },
        ConflictStrategy::ClientWinsDraft => {
            let status = server_entity.get("status").and_then(Value::as_str);
            if status == Some("draft") {
                Resolution::Proceed {
                    body: client_body.clone(),
                }
            } else {
                Resolution::Skip {
                    reason: format!(
                        "server copy is no longer a draft (status: {})",
                        status.unwrap_or("missing")
                    ),
                }
            }
        }
        ConflictStrategy::Merge => Resolution::Proceed {
            body: merge_values(server_entity, client_body),
        },
    }
}

/// Merge offline edits onto the fresher server copy.
///
/// The server object is the base. Every non-null client field overwrites the
/// server's; when both sides hold plain objects the merge recurses. Arrays
/// and scalars are replaced whole, never spliced.
pub fn merge_values(server: &Value, client: &Value) -> Value {
    match (server, client) {
        (Value::Object(server_map), Value::Object(client_map)) => {
            let mut merged = server_map.clone();
            for (key, client_value) in client_map {
                if client_value.is_null() {
                    continue;
                }
                let entry = match server_map.get(key) {
                    Some(server_value) if server_value.is_object() && client_value.is_object() => {
                        merge_values(server_value, client_value)
                    }
                    _ => client_value.clone(),
                };
                merged.insert(key.clone(), entry);
            }
            Value::Object(merged)
        }
        _ => client.clone(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;
    use serde_json::json;

    use super::*;

    #[test]
    fn merge_keeps_server_fields_the_client_never_touched() {
        let server = json!({"a": 1, "b": 2, "c": 3});
        let client = json!({"b": 9, "d": 4, "c": null});
        assert_eq!(
            merge_values(&server, &client),
            json!({"a": 1, "b": 9, "c": 3, "d": 4})
        );
    }

    #[test]
    fn merge_recurses_into_nested_objects() {
        let server = json!({
            "location": {"site": "plant-7", "zone": "loading", "inspector": "rivera"},
            "severity": "low"
        });
        let client = json!({
            "location": {"zone": "dock-3"},
            "severity": "high"
        });
        assert_eq!(
            merge_values(&server, &client),
            json!({
                "location": {"site": "plant-7", "zone": "dock-3", "inspector": "rivera"},
                "severity": "high"
            })
        );
    }

    #[test]
    fn arrays_are_replaced_whole_by_the_client() {
        let server = json!({"checklist": ["ladder", "harness", "signage"]});
        let client = json!({"checklist": ["ladder"]});
        assert_eq!(
            merge_values(&server, &client),
            json!({"checklist": ["ladder"]})
        );
    }

    #[test]
    fn type_mismatch_on_a_field_takes_the_client_value() {
        let server = json!({"assignee": {"id": 7, "name": "kim"}});
        let client = json!({"assignee": "unassigned"});
        assert_eq!(
            merge_values(&server, &client),
            json!({"assignee": "unassigned"})
        );
    }

    #[test]
    fn non_object_bodies_fall_back_to_the_client_copy() {
        assert_eq!(merge_values(&json!([1, 2]), &json!([3])), json!([3]));
        assert_eq!(merge_values(&json!({"a": 1}), &json!(5)), json!(5));
    }

    #[test]
    fn server_wins_skips_with_a_reason() {
        let res = resolve(ConflictStrategy::ServerWins, &json!({"a": 1}), &json!({"a": 2}));
        assert!(matches!(res, Resolution::Skip { .. }));
    }

    #[test]
    fn client_wins_replays_the_original_body() {
        let body = json!({"note": "kept"});
        let res = resolve(ConflictStrategy::ClientWins, &body, &json!({"note": "server"}));
        assert_eq!(res, Resolution::Proceed { body });
    }

    #[test]
    fn draft_gate_allows_replay_only_while_server_copy_is_draft() {
        let body = json!({"findings": "guardrail loose"});

        let still_draft = resolve(
            ConflictStrategy::ClientWinsDraft,
            &body,
            &json!({"status": "draft"}),
        );
        assert_eq!(still_draft, Resolution::Proceed { body: body.clone() });

        let submitted = resolve(
            ConflictStrategy::ClientWinsDraft,
            &body,
            &json!({"status": "submitted"}),
        );
        match submitted {
            Resolution::Skip { reason } => assert!(reason.contains("submitted")),
            other => panic!("expected skip, got {other:?}"),
        }

        let missing_status = resolve(ConflictStrategy::ClientWinsDraft, &body, &json!({}));
        assert!(matches!(missing_status, Resolution::Skip { .. }));
    }

    fn prefixed_map(prefix: &'static str) -> impl Strategy<Value = BTreeMap<String, i64>> {
        prop::collection::btree_map("[a-z]{1,4}", any::<i64>(), 0..6).prop_map(move |m| {
            m.into_iter()
                .map(|(k, v)| (format!("{prefix}_{k}"), v))
                .collect()
        })
    }

    fn to_json(map: &BTreeMap<String, i64>) -> Value {
        json!(map)
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: merging objects with disjoint keys is exactly their union.
        #[test]
        fn disjoint_merge_is_the_union(
            server in prefixed_map("s"),
            client in prefixed_map("c"),
        ) {
            let merged = merge_values(&to_json(&server), &to_json(&client));
            let merged = merged.as_object().unwrap();

            prop_assert_eq!(merged.len(), server.len() + client.len());
            for (k, v) in &server {
                prop_assert_eq!(merged[k].as_i64(), Some(*v));
            }
            for (k, v) in &client {
                prop_assert_eq!(merged[k].as_i64(), Some(*v));
            }
        }

        /// Property: on shared keys the client value wins, and client nulls
        /// never erase server fields.
        #[test]
        fn client_wins_shared_keys_but_nulls_never_erase(
            base in prefixed_map("k"),
            null_keys in prop::collection::vec(0usize..6, 0..4),
        ) {
            let server = to_json(&base);
            let keys: Vec<_> = base.keys().cloned().collect();

            let mut client_map = serde_json::Map::new();
            for (i, key) in keys.iter().enumerate() {
                if null_keys.contains(&i) {
                    client_map.insert(key.clone(), Value::Null);
                } else {
                    client_map.insert(key.clone(), json!(i as i64 + 1_000));
                }
            }
            let merged = merge_values(&server, &Value::Object(client_map.clone()));
            let merged = merged.as_object().unwrap();

            for (i, key) in keys.iter().enumerate() {
                if null_keys.contains(&i) {
                    // Null from the client leaves the server value alone.
                    prop_assert_eq!(merged[key].as_i64(), Some(base[key]));
                } else {
                    prop_assert_eq!(merged[key].as_i64(), Some(i as i64 + 1_000));
                }
            }
        }
    }
}
