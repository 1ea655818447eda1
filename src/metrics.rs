//! 执行计数指标,启用 `metrics` 特性时导出到 prometheus

#[cfg(feature = "metrics")]
mod enabled {
    use lazy_static::lazy_static;
    use prometheus::{IntCounterVec, Opts, Registry};

    lazy_static! {
        pub static ref REGISTRY: Registry = Registry::new();
        static ref PASSES: IntCounterVec = {
            let counter = IntCounterVec::new(
                Opts::new("rule_graph_passes_total", "规则图执行次数"),
                &["outcome"],
            )
            .unwrap();
            REGISTRY.register(Box::new(counter.clone())).unwrap();
            counter
        };
        static ref NODE_FAILURES: IntCounterVec = {
            let counter = IntCounterVec::new(
                Opts::new("rule_graph_node_failures_total", "节点执行失败次数"),
                &["subtype"],
            )
            .unwrap();
            REGISTRY.register(Box::new(counter.clone())).unwrap();
            counter
        };
        static ref LOG_FAILURES: IntCounterVec = {
            let counter = IntCounterVec::new(
                Opts::new("rule_graph_log_failures_total", "执行日志写入失败次数"),
                &["sink"],
            )
            .unwrap();
            REGISTRY.register(Box::new(counter.clone())).unwrap();
            counter
        };
    }

    pub fn record_pass(outcome: &str) {
        PASSES.with_label_values(&[outcome]).inc();
    }

    pub fn record_node_failure(subtype: &str) {
        NODE_FAILURES.with_label_values(&[subtype]).inc();
    }

    pub fn record_log_failure(sink: &str) {
        LOG_FAILURES.with_label_values(&[sink]).inc();
    }

    pub fn pass_count(outcome: &str) -> u64 {
        PASSES.with_label_values(&[outcome]).get()
    }
}

#[cfg(feature = "metrics")]
pub use enabled::*;

#[cfg(not(feature = "metrics"))]
mod disabled {
    pub fn record_pass(_outcome: &str) {}

    pub fn record_node_failure(_subtype: &str) {}

    pub fn record_log_failure(_sink: &str) {}

    pub fn pass_count(_outcome: &str) -> u64 {
        0
    }
}

#[cfg(not(feature = "metrics"))]
pub use disabled::*;

#[cfg(all(test, feature = "metrics"))]
mod tests {
    use super::*;

    #[test]
    fn passes_are_counted_and_exported() {
        let before = pass_count("test_outcome");
        record_pass("test_outcome");
        record_pass("test_outcome");
        assert_eq!(pass_count("test_outcome"), before + 2);

        let families = REGISTRY.gather();
        assert!(families.iter().any(|f| f.get_name() == "rule_graph_passes_total"));
    }
}
