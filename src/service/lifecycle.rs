//! Job status machine: which actions each viewer may take in each status,
//! and where each action leads.
//!
//! The same table drives the buttons a screen renders (`allowed_actions`)
//! and the server-side check before any write (`is_allowed`).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::{
    labourmodel::{Job, JobStatus},
    usermodel::{Profile, UserRole},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobAction {
    Take,
    AutoAssign,
    Accept,
    Reject,
    Depart,
    Arrive,
    Start,
    Complete,
    Cancel,
    Reassign,
    Review,
}

impl JobAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobAction::Take => "take",
            JobAction::AutoAssign => "auto_assign",
            JobAction::Accept => "accept",
            JobAction::Reject => "reject",
            JobAction::Depart => "depart",
            JobAction::Arrive => "arrive",
            JobAction::Start => "start",
            JobAction::Complete => "complete",
            JobAction::Cancel => "cancel",
            JobAction::Reassign => "reassign",
            JobAction::Review => "review",
        }
    }

    /// Statuses the action may be applied from.
    pub fn from_statuses(&self) -> &'static [JobStatus] {
        use JobStatus::*;
        match self {
            JobAction::Take => &[Open],
            JobAction::AutoAssign => &[Open, Rejected],
            JobAction::Accept | JobAction::Reject => &[Assigned],
            JobAction::Depart => &[Accepted],
            JobAction::Arrive => &[OnRoute],
            JobAction::Start => &[Accepted, Arrived],
            JobAction::Complete => &[Started],
            JobAction::Cancel => &[Open, Assigned, Accepted, OnRoute, Arrived, Started, Rejected],
            JobAction::Reassign => &[Assigned, Rejected],
            JobAction::Review => &[Completed],
        }
    }

    /// Status the job ends up in. Reassign may also fall back to `Open`
    /// when nobody else is available; that is decided by the matcher.
    pub fn target(&self, from: JobStatus) -> Option<JobStatus> {
        if !self.from_statuses().contains(&from) {
            return None;
        }

        let to = match self {
            JobAction::Take | JobAction::Accept => JobStatus::Accepted,
            JobAction::AutoAssign | JobAction::Reassign => JobStatus::Assigned,
            JobAction::Reject => JobStatus::Rejected,
            JobAction::Depart => JobStatus::OnRoute,
            JobAction::Arrive => JobStatus::Arrived,
            JobAction::Start => JobStatus::Started,
            JobAction::Complete => JobStatus::Completed,
            JobAction::Cancel => JobStatus::Cancelled,
            JobAction::Review => JobStatus::Completed,
        };

        Some(to)
    }
}

impl fmt::Display for JobAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the current user relates to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobViewer {
    Owner,
    AssignedProvider,
    Admin,
    /// A provider of the right kind who could take the job.
    Prospect,
    Outsider,
}

impl JobViewer {
    pub fn of(profile: &Profile, job: &Job) -> JobViewer {
        if job.client_id == profile.id {
            JobViewer::Owner
        } else if job.worker_id == Some(profile.id) {
            JobViewer::AssignedProvider
        } else if profile.is_admin() {
            JobViewer::Admin
        } else if prospect_role_fits(profile.role, job) {
            JobViewer::Prospect
        } else {
            JobViewer::Outsider
        }
    }
}

fn prospect_role_fits(role: UserRole, job: &Job) -> bool {
    match role {
        UserRole::Taxi => job.is_taxi_job(),
        UserRole::Worker => !job.is_taxi_job(),
        UserRole::Client | UserRole::Admin => false,
    }
}

/// Buttons the viewer should see, in display order.
pub fn allowed_actions(status: JobStatus, viewer: JobViewer, already_reviewed: bool) -> Vec<JobAction> {
    use JobAction::*;
    use JobStatus as S;
    use JobViewer as V;

    match (status, viewer) {
        (S::Open, V::Owner) | (S::Open, V::Admin) => vec![AutoAssign, Cancel],
        (S::Open, V::Prospect) => vec![Take],

        (S::Assigned, V::Owner) => vec![Cancel],
        (S::Assigned, V::AssignedProvider) => vec![Accept, Reject],
        (S::Assigned, V::Admin) => vec![Reassign, Cancel],

        (S::Accepted, V::AssignedProvider) => vec![Depart, Start, Cancel],
        (S::OnRoute, V::AssignedProvider) => vec![Arrive, Cancel],
        (S::Arrived, V::AssignedProvider) => vec![Start, Cancel],
        (S::Accepted | S::OnRoute | S::Arrived, V::Owner | V::Admin) => vec![Cancel],

        (S::Started, V::AssignedProvider) => vec![Complete],
        (S::Started, V::Admin) => vec![Cancel],

        (S::Completed, V::Owner) if !already_reviewed => vec![Review],

        (S::Rejected, V::Owner) => vec![AutoAssign, Cancel],
        (S::Rejected, V::Admin) => vec![Reassign, Cancel],

        _ => Vec::new(),
    }
}

pub fn is_allowed(action: JobAction, status: JobStatus, viewer: JobViewer, already_reviewed: bool) -> bool {
    allowed_actions(status, viewer, already_reviewed).contains(&action)
}
