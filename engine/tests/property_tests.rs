use proptest::prelude::*;
use sdk::TaskStatus;
use stepwise_engine::conductor::aggregate_status;
use stepwise_engine::conductor::progress::percent_complete;
use stepwise_engine::config::Config;

// Aggregation: the final status is a pure function of the completion rate
proptest! {
    #[test]
    fn test_aggregate_status_matches_thresholds(total in 1usize..200, completed_seed in 0usize..200) {
        let completed = completed_seed % (total + 1);
        let (status, rate) = aggregate_status(completed, total);

        prop_assert!((0.0..=1.0).contains(&rate));
        let expected = if rate >= 0.8 {
            TaskStatus::Completed
        } else if rate >= 0.5 {
            TaskStatus::Partial
        } else {
            TaskStatus::Failed
        };
        prop_assert_eq!(status, expected);
        prop_assert!(status.is_terminal());
    }

    #[test]
    fn test_aggregate_status_is_monotonic(total in 1usize..100, a in 0usize..100, b in 0usize..100) {
        let (lo, hi) = {
            let a = a % (total + 1);
            let b = b % (total + 1);
            (a.min(b), a.max(b))
        };
        let rank = |s: TaskStatus| match s {
            TaskStatus::Failed => 0,
            TaskStatus::Partial => 1,
            _ => 2,
        };
        prop_assert!(rank(aggregate_status(lo, total).0) <= rank(aggregate_status(hi, total).0));
    }

    #[test]
    fn test_percent_complete_bounded(total in 0usize..500, completed_seed in 0usize..500) {
        let completed = if total == 0 { 0 } else { completed_seed % (total + 1) };
        let percent = percent_complete(completed, total);
        prop_assert!((0.0..=100.0).contains(&percent));
        if completed == total && total > 0 {
            prop_assert_eq!(percent, 100.0);
        }
    }
}

// Configuration survives a TOML round trip
proptest! {
    #[test]
    fn test_config_parsing_round_trip(
        log_level in "error|warn|info|debug|trace",
        temperature in 0.0f32..=2.0,
        step_pause_ms in 0u64..10_000,
        max_subtasks in 1usize..50,
        importance in 1i64..=10,
        context_key in "[a-z]{1,12}",
        poll in 1u64..60,
    ) {
        let mut config = Config::default();
        config.core.log_level = log_level;
        config.llm.temperature = temperature;
        config.workflow.step_pause_ms = step_pause_ms;
        config.workflow.max_subtasks = max_subtasks;
        config.workflow.default_importance = importance;
        config.workflow.context_key = context_key;
        config.progress.poll_interval_secs = poll;

        let toml_string = toml::to_string_pretty(&config)
            .expect("Failed to serialize config to TOML");
        let parsed: Config = toml::from_str(&toml_string)
            .expect("Failed to parse serialized TOML");

        prop_assert_eq!(&parsed.core.log_level, &config.core.log_level);
        prop_assert_eq!(parsed.core.data_dir, config.core.data_dir);
        prop_assert_eq!(parsed.llm.temperature, config.llm.temperature);
        prop_assert_eq!(&parsed.llm.model, &config.llm.model);
        prop_assert_eq!(parsed.workflow.step_pause_ms, config.workflow.step_pause_ms);
        prop_assert_eq!(parsed.workflow.max_subtasks, config.workflow.max_subtasks);
        prop_assert_eq!(parsed.workflow.default_importance, config.workflow.default_importance);
        prop_assert_eq!(&parsed.workflow.context_key, &config.workflow.context_key);
        prop_assert_eq!(parsed.progress.poll_interval_secs, config.progress.poll_interval_secs);
    }
}
