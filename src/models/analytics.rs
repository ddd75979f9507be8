use serde::{Deserialize, Serialize};
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{
    activity::ActivityLog,
    common::{AccountStatus, Role},
};

/// DashboardTotals
///
/// Raw counters compiled by the repository in one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DashboardTotals {
    pub total_users: u32,
    pub active_users: u32,
    pub students: u32,
    pub faculty: u32,
    pub staff: u32,
    pub admins: u32,
    pub departments: u32,
    pub subjects: u32,
    pub active_subjects: u32,
    pub files: u32,
}

/// `GET /api/analytics/dashboard`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DashboardStats {
    pub totals: DashboardTotals,
    pub recent_activities: Vec<ActivityLog>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct RoleCount {
    pub role: Role,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[ts(export)]
pub struct StatusCount {
    pub status: AccountStatus,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct DepartmentUserCount {
    pub department_id: Uuid,
    pub department_name: String,
    pub count: u32,
}

/// UserStats
///
/// `GET /api/users/stats` and `GET /api/analytics/users`. Roles and statuses
/// with zero users are still listed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS, ToSchema)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct UserStats {
    pub total: u32,
    pub by_role: Vec<RoleCount>,
    pub by_status: Vec<StatusCount>,
    pub by_department: Vec<DepartmentUserCount>,
    /// Accounts created in the last 30 days.
    pub new_last_30_days: u32,
}
