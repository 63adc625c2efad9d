use crate::models::{
    AnalyticsRecord, AnalyticsTrendPoint, CategoryMetrics, CategoryReportRow, EngagementPoint, EngagementSummary,
    MetricsSummary, PerformanceMetric, RealtimeMetric, ReportKind, ReportRows, SalesPoint, SalesRecord,
    SalesReportRow, SalesSummary,
};
use chrono::NaiveDate;
use std::collections::{BTreeMap, HashMap};

pub const REPORT_ANALYTICS_WINDOW: usize = 12;
const PERFORMANCE_CATEGORY: &str = "Performance";

/// Borrowed inputs for `build_report`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReportSources<'a> {
    pub sales: &'a [SalesRecord],
    pub analytics: &'a [AnalyticsRecord],
    pub metrics: &'a [PerformanceMetric],
}

/// Takes the newest `n` of a date-descending slice and returns them oldest first.
pub fn engagement_window(records: &[AnalyticsRecord], n: usize) -> Vec<EngagementPoint> {
    records
        .iter()
        .take(n)
        .rev()
        .map(|record| EngagementPoint {
            date: short_date_label(&record.date),
            active_users: record.active_users,
            new_users: record.new_users,
            session_duration: (record.session_duration / 60.0).round() as i64,
            bounce_rate: record.bounce_rate,
        })
        .collect()
}

pub fn analytics_trend(records: &[AnalyticsRecord], n: usize) -> Vec<AnalyticsTrendPoint> {
    records
        .iter()
        .take(n)
        .rev()
        .map(|record| AnalyticsTrendPoint {
            date: record.date.clone(),
            active_users: record.active_users,
            new_users: record.new_users,
            session_duration: record.session_duration,
        })
        .collect()
}

/// "2024-01-05" becomes "Jan 5". Unparseable input is returned unchanged.
pub fn short_date_label(raw: &str) -> String {
    let day = raw.get(..10).unwrap_or(raw);
    match NaiveDate::parse_from_str(day, "%Y-%m-%d") {
        Ok(date) => date.format("%b %-d").to_string(),
        Err(_) => raw.to_string(),
    }
}

/// One entry per category in first-seen order. A repeated metric name within
/// a category keeps the later value.
pub fn group_by_category(metrics: &[PerformanceMetric]) -> Vec<CategoryMetrics> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, BTreeMap<String, f64>> = HashMap::new();
    for metric in metrics {
        let values = grouped.entry(metric.category.clone()).or_insert_with(|| {
            order.push(metric.category.clone());
            BTreeMap::new()
        });
        values.insert(metric.metric_name.clone(), metric.metric_value);
    }
    order
        .into_iter()
        .map(|category| {
            let values = grouped.remove(&category).unwrap_or_default();
            CategoryMetrics { category, values }
        })
        .collect()
}

pub fn category_report(metrics: &[PerformanceMetric]) -> Vec<CategoryReportRow> {
    let mut order: Vec<String> = Vec::new();
    let mut samples: HashMap<String, Vec<f64>> = HashMap::new();
    for metric in metrics {
        samples
            .entry(metric.category.clone())
            .or_insert_with(|| {
                order.push(metric.category.clone());
                Vec::new()
            })
            .push(metric.metric_value);
    }
    order
        .into_iter()
        .map(|category| {
            let values = samples.remove(&category).unwrap_or_default();
            CategoryReportRow {
                count: values.len(),
                avg_value: average(&values),
                category,
            }
        })
        .collect()
}

pub fn sales_chart(records: &[SalesRecord]) -> Vec<SalesPoint> {
    records
        .iter()
        .map(|record| SalesPoint {
            month: record.month.clone(),
            revenue: record.revenue / 1000.0,
            orders: record.orders,
            customers: record.customers,
        })
        .collect()
}

pub fn sales_report(records: &[SalesRecord]) -> Vec<SalesReportRow> {
    records
        .iter()
        .map(|record| SalesReportRow {
            period: record.month.clone(),
            revenue: record.revenue,
            orders: record.orders,
            customers: record.customers,
            avg_order_value: average_order_value(record.revenue, record.orders),
        })
        .collect()
}

pub fn average_order_value(revenue: f64, orders: i64) -> i64 {
    if orders == 0 {
        return 0;
    }
    (revenue / orders as f64).round() as i64
}

pub fn sum(values: &[f64]) -> f64 {
    values.iter().sum()
}

pub fn average(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    sum(values) / values.len() as f64
}

pub fn min(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::min).unwrap_or(0.0)
}

pub fn max(values: &[f64]) -> f64 {
    values.iter().copied().reduce(f64::max).unwrap_or(0.0)
}

pub fn sales_summary(records: &[SalesRecord]) -> SalesSummary {
    SalesSummary {
        count: records.len(),
        total_revenue: records.iter().map(|record| record.revenue).sum(),
        total_orders: records.iter().map(|record| record.orders).sum(),
        total_customers: records.iter().map(|record| record.customers).sum(),
    }
}

pub fn engagement_summary(records: &[AnalyticsRecord]) -> EngagementSummary {
    let active: Vec<f64> = records.iter().map(|record| record.active_users as f64).collect();
    let durations: Vec<f64> = records.iter().map(|record| record.session_duration).collect();
    let bounce: Vec<f64> = records.iter().map(|record| record.bounce_rate).collect();
    EngagementSummary {
        count: records.len(),
        peak_active_users: max(&active),
        avg_session_duration: average(&durations),
        min_bounce_rate: min(&bounce),
    }
}

pub fn metrics_summary(metrics: &[PerformanceMetric]) -> MetricsSummary {
    let performance: Vec<f64> = metrics
        .iter()
        .filter(|metric| metric.category == PERFORMANCE_CATEGORY)
        .map(|metric| metric.metric_value)
        .collect();
    MetricsSummary {
        count: metrics.len(),
        categories: group_by_category(metrics).len(),
        performance_total: sum(&performance),
    }
}

pub fn build_report(kind: ReportKind, sources: &ReportSources<'_>) -> ReportRows {
    match kind {
        ReportKind::Sales => ReportRows::Sales(sales_report(sources.sales)),
        ReportKind::Analytics => {
            ReportRows::Analytics(engagement_window(sources.analytics, REPORT_ANALYTICS_WINDOW))
        }
        ReportKind::Performance => ReportRows::Performance(category_report(sources.metrics)),
        ReportKind::Custom => ReportRows::Custom,
    }
}

pub fn format_realtime_value(metric: &RealtimeMetric) -> String {
    if metric.name == "Revenue" {
        return format!("${}k", (metric.value / 1000.0).round() as i64);
    }
    if metric.name.ends_with("Rate") {
        return format!("{:.1}%", metric.value);
    }
    group_thousands(metric.value.round() as i64)
}

fn group_thousands(value: i64) -> String {
    let digits = value.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 1);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }
    if value < 0 {
        format!("-{}", grouped)
    } else {
        grouped
    }
}
