use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesRecord {
    pub id: i64,
    pub month: String,
    pub revenue: f64,
    pub orders: i64,
    pub customers: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsRecord {
    pub id: i64,
    pub date: String,
    pub active_users: i64,
    pub new_users: i64,
    /// Seconds.
    pub session_duration: f64,
    pub bounce_rate: f64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetric {
    pub id: i64,
    pub metric_name: String,
    pub metric_value: f64,
    pub timestamp: String,
    pub category: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMetric {
    pub name: String,
    pub value: f64,
    pub change: f64,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeSnapshot {
    pub timestamp: DateTime<Utc>,
    pub metrics: Vec<RealtimeMetric>,
}

/// Client-local record of the signed-in demo user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub email: String,
    pub name: String,
    pub role: String,
    pub login_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: String,
    pub created_at: DateTime<Utc>,
    pub last_signed_in_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateSessionPayload {
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessResponse {
    pub success: bool,
}

impl SuccessResponse {
    pub fn ok() -> Self {
        Self { success: true }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RedirectUrlResponse {
    pub redirect_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub service: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesPoint {
    pub month: String,
    /// Thousands.
    pub revenue: f64,
    pub orders: i64,
    pub customers: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SalesReportRow {
    pub period: String,
    pub revenue: f64,
    pub orders: i64,
    pub customers: i64,
    pub avg_order_value: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementPoint {
    pub date: String,
    pub active_users: i64,
    pub new_users: i64,
    /// Minutes, rounded.
    pub session_duration: i64,
    pub bounce_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsTrendPoint {
    pub date: String,
    pub active_users: i64,
    pub new_users: i64,
    pub session_duration: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryMetrics {
    pub category: String,
    pub values: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryReportRow {
    pub category: String,
    pub count: usize,
    pub avg_value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SalesSummary {
    pub count: usize,
    pub total_revenue: f64,
    pub total_orders: i64,
    pub total_customers: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngagementSummary {
    pub count: usize,
    pub peak_active_users: f64,
    pub avg_session_duration: f64,
    pub min_bounce_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSummary {
    pub count: usize,
    pub categories: usize,
    pub performance_total: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportKind {
    Sales,
    Analytics,
    Performance,
    Custom,
}

impl ReportKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::Analytics => "analytics",
            Self::Performance => "performance",
            Self::Custom => "custom",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "rows", rename_all = "kebab-case")]
pub enum ReportRows {
    Sales(Vec<SalesReportRow>),
    Analytics(Vec<EngagementPoint>),
    Performance(Vec<CategoryReportRow>),
    Custom,
}

impl ReportRows {
    pub fn len(&self) -> usize {
        match self {
            Self::Sales(rows) => rows.len(),
            Self::Analytics(rows) => rows.len(),
            Self::Performance(rows) => rows.len(),
            Self::Custom => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
