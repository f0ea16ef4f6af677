//! Prometheus metrics collection

use prometheus::{
    register_counter_vec, register_histogram_vec, register_int_gauge, CounterVec, HistogramVec,
    IntGauge,
};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

pub struct Metrics {
    pub task_total: CounterVec,
    pub task_duration: HistogramVec,
    pub task_active: IntGauge,
    pub errors_total: CounterVec,
}

impl Metrics {
    pub fn init() -> &'static Self {
        METRICS.get_or_init(|| Metrics {
            task_total: register_counter_vec!(
                "dl_task_total",
                "Total number of tasks processed",
                &["status"]
            )
            .unwrap(),
            task_duration: register_histogram_vec!(
                "dl_task_duration_seconds",
                "Task pipeline duration in seconds",
                &["status"],
                vec![5.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0, 14400.0]
            )
            .unwrap(),
            task_active: register_int_gauge!("dl_task_active", "Number of currently active tasks")
                .unwrap(),
            errors_total: register_counter_vec!(
                "dl_errors_total",
                "Total number of errors",
                &["type"]
            )
            .unwrap(),
        })
    }

    pub fn record_task_start(&self) {
        self.task_active.inc();
    }

    pub fn record_task_complete(&self, status: &str, duration_secs: f64) {
        self.task_total.with_label_values(&[status]).inc();
        self.task_duration
            .with_label_values(&[status])
            .observe(duration_secs);
        self.task_active.dec();
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors_total.with_label_values(&[error_type]).inc();
    }
}

pub fn get_metrics() -> &'static Metrics {
    Metrics::init()
}
