#[cfg(test)]
mod tests {
    use crate::error::NodeError;
    use crate::model::TemporalType;
    use crate::net::pool::SendOutcome;
    use crate::net::protocol::{Event, MetadataKind, QueryPayload};
    use crate::net::reactor::EventSink;
    use crate::query::time::parse_time_window;
    use crate::query::{CoordinatorState, RequestCoordinator};

    const JUNE_15_NOON: i64 = 1_686_830_400_000;

    fn rows_reply(query_id: &str, host: &str, rows: Vec<Vec<String>>) -> Event {
        Event::QueryResponse {
            query_id: query_id.into(),
            payload: QueryPayload::Rows {
                host: host.into(),
                features: vec!["temperature".into()],
                rows,
            },
        }
    }

    fn aggregate_of(event: Event) -> crate::net::protocol::QueryAggregate {
        match event {
            Event::QueryResponse {
                payload: QueryPayload::Aggregate(agg),
                ..
            } => agg,
            other => panic!("expected aggregate, got {:?}", other),
        }
    }

    // ============================================================
    // TIME EXPRESSIONS
    // ============================================================

    #[test]
    fn test_parse_time_window_day() {
        let (start, end) = parse_time_window("2023-06-15-00", TemporalType::Day, false)
            .unwrap()
            .unwrap();
        assert_eq!(start, JUNE_15_NOON - 12 * 3_600_000);
        assert_eq!(end - start, 86_400_000);
    }

    #[test]
    fn test_parse_time_window_hour_and_month() {
        let (start, end) = parse_time_window("2023-06-15-12", TemporalType::Hour, false)
            .unwrap()
            .unwrap();
        assert_eq!(start, JUNE_15_NOON);
        assert_eq!(end - start, 3_600_000);

        let (start, end) = parse_time_window("2023-06-15-12", TemporalType::Month, false)
            .unwrap()
            .unwrap();
        // Truncated to the first of June; June has 30 days.
        assert_eq!(start, JUNE_15_NOON - 12 * 3_600_000 - 14 * 86_400_000);
        assert_eq!(end - start, 30 * 86_400_000);
    }

    #[test]
    fn test_wildcard_at_granularity_means_unbounded() {
        assert!(parse_time_window("2023-06-x-00", TemporalType::Day, false)
            .unwrap()
            .is_none());
        assert!(parse_time_window("x-06-15-00", TemporalType::Year, false)
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_wildcard_in_coarser_component_rejected_by_default() {
        let err = parse_time_window("x-06-15-00", TemporalType::Day, false).unwrap_err();
        assert!(matches!(err, NodeError::Validation(_)));
        // Opting in substitutes the wall clock instead of failing.
        assert!(parse_time_window("x-06-15-00", TemporalType::Day, true).is_ok());
    }

    #[test]
    fn test_malformed_time_expressions() {
        assert!(parse_time_window("2023-06-15", TemporalType::Day, false).is_err());
        assert!(parse_time_window("2023-06-95-00", TemporalType::Day, false).is_err());
        assert!(parse_time_window("2023-soon-15-00", TemporalType::Day, false).is_err());
    }

    // ============================================================
    // COORDINATOR STATE MACHINE
    // ============================================================

    #[test]
    fn test_coordinator_completes_on_last_reply() {
        let (client, mut client_rx) = EventSink::channel();
        let mut c = RequestCoordinator::query("q1".into(), "origin:5000".into(), client, None);
        c.record_outcome("peer1:5000".into(), SendOutcome::Sent);
        c.record_outcome("peer2:5000".into(), SendOutcome::Sent);
        c.finish_dispatch();
        assert_eq!(c.state(), CoordinatorState::Waiting);

        let done = c.on_response(&rows_reply("q1", "peer1:5000", vec![vec!["21.5".into()]]));
        assert!(!done);
        assert!(client_rx.try_recv().is_err());

        let done = c.on_response(&rows_reply("q1", "peer2:5000", vec![vec!["18.0".into()]]));
        assert!(done);

        let agg = aggregate_of(client_rx.try_recv().unwrap());
        assert_eq!(agg.rows.len(), 2);
        assert_eq!(agg.total_result_size, 2);
        assert!(agg.missing.is_empty());
        // Exactly one reply.
        assert!(client_rx.try_recv().is_err());
    }

    #[test]
    fn test_coordinator_deadline_records_missing() {
        let (client, mut client_rx) = EventSink::channel();
        let mut c = RequestCoordinator::query("q2".into(), "origin:5000".into(), client, None);
        c.record_outcome("peer1:5000".into(), SendOutcome::Sent);
        c.record_outcome("peer2:5000".into(), SendOutcome::Sent);
        c.record_outcome("peer3:5000".into(), SendOutcome::Sent);
        c.finish_dispatch();

        c.on_response(&rows_reply("q2", "peer1:5000", vec![vec!["1".into()]]));
        c.on_response(&rows_reply("q2", "peer3:5000", vec![vec!["3".into()]]));
        c.on_deadline();

        let agg = aggregate_of(client_rx.try_recv().unwrap());
        assert_eq!(agg.missing, vec!["peer2:5000".to_string()]);
        assert_eq!(agg.rows.len(), 2);

        // A straggler after completion changes nothing.
        c.on_response(&rows_reply("q2", "peer2:5000", vec![vec!["2".into()]]));
        assert!(client_rx.try_recv().is_err());
    }

    #[test]
    fn test_coordinator_failed_dispatch_goes_to_missing() {
        let (client, mut client_rx) = EventSink::channel();
        let mut c = RequestCoordinator::query("q3".into(), "origin:5000".into(), client, None);
        c.record_outcome("peer1:5000".into(), SendOutcome::Failed);
        c.record_outcome("peer2:5000".into(), SendOutcome::Failed);
        c.finish_dispatch();

        // Nothing reachable: completes immediately, reply lists everyone.
        assert!(c.is_complete());
        let agg = aggregate_of(client_rx.try_recv().unwrap());
        assert_eq!(
            agg.missing,
            vec!["peer1:5000".to_string(), "peer2:5000".to_string()]
        );
    }

    #[test]
    fn test_coordinator_peer_disconnect_counts_as_missing() {
        let (client, mut client_rx) = EventSink::channel();
        let mut c = RequestCoordinator::query("q5".into(), "origin:5000".into(), client, None);
        c.record_outcome("peer1:5000".into(), SendOutcome::Sent);
        c.record_outcome("peer2:5000".into(), SendOutcome::Sent);
        c.finish_dispatch();

        // A connection drop from an unrelated peer changes nothing.
        assert!(!c.on_peer_gone("peer9:5000"));

        c.on_response(&rows_reply("q5", "peer1:5000", vec![]));
        assert!(c.on_peer_gone("peer2:5000"));

        let agg = aggregate_of(client_rx.try_recv().unwrap());
        assert_eq!(agg.missing, vec!["peer2:5000".to_string()]);
    }

    #[test]
    fn test_coordinator_cancel_sends_nothing() {
        let (client, mut client_rx) = EventSink::channel();
        let mut c = RequestCoordinator::query("q4".into(), "origin:5000".into(), client, None);
        c.record_outcome("peer1:5000".into(), SendOutcome::Sent);
        c.finish_dispatch();
        c.cancel();
        assert!(c.is_complete());
        assert!(client_rx.try_recv().is_err());
    }

    #[test]
    fn test_metadata_coordinator_merges_host_arrays() {
        let (client, mut client_rx) = EventSink::channel();
        let mut c = RequestCoordinator::metadata(
            "m1".into(),
            "origin:5000".into(),
            client,
            MetadataKind::Filesystem,
        );
        c.record_outcome("peer1:5000".into(), SendOutcome::Sent);
        c.record_outcome("peer2:5000".into(), SendOutcome::Sent);
        c.finish_dispatch();

        c.on_response(&Event::MetadataResponse {
            request_id: "m1".into(),
            kind: MetadataKind::Filesystem,
            host: "peer1:5000".into(),
            result_json: Some(r#"[{"name":"weather"}]"#.into()),
            error: None,
            missing: vec![],
        });
        c.on_response(&Event::MetadataResponse {
            request_id: "m1".into(),
            kind: MetadataKind::Filesystem,
            host: "peer2:5000".into(),
            result_json: Some(r#"[{"name":"weather"}]"#.into()),
            error: Some("disk on fire".into()),
            missing: vec![],
        });

        match client_rx.try_recv().unwrap() {
            Event::MetadataResponse {
                result_json, error, ..
            } => {
                let merged: serde_json::Value =
                    serde_json::from_str(&result_json.unwrap()).unwrap();
                assert_eq!(merged.as_array().unwrap().len(), 2);
                assert!(error.unwrap().contains("peer2:5000"));
            }
            other => panic!("unexpected reply {:?}", other),
        }
    }
}
