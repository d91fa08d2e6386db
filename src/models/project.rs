//! Scraped project/permit records.

use serde::Serialize;

/// Archive tag attached to records harvested from the active dashboard view.
pub const ACTIVE_TAG: &str = "Active";

/// Archive tag attached to records harvested from the archived view.
pub const ARCHIVED_TAG: &str = "Archived";

/// One permit/project entry scraped from the dashboard.
///
/// Records are only built by the record parser and expose read-only
/// accessors; every field comes from a single parse of one row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ProjectRecord {
    pub(crate) reference_id: i64,
    pub(crate) application_number: Option<String>,
    pub(crate) unit: String,
    pub(crate) status_more_info: Option<String>,
    pub(crate) status: String,
    pub(crate) status_date: String,
    pub(crate) address: String,
    pub(crate) application_type: Option<String>,
    pub(crate) assigned_staff: Option<String>,
    pub(crate) sys_ref: String,
    pub(crate) archived: String,
}

impl ProjectRecord {
    pub fn reference_id(&self) -> i64 {
        self.reference_id
    }

    pub fn application_number(&self) -> Option<&str> {
        self.application_number.as_deref()
    }

    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Not present in the current dashboard format; always `None`.
    pub fn status_more_info(&self) -> Option<&str> {
        self.status_more_info.as_deref()
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    /// Raw status date text as shown on the dashboard.
    pub fn status_date(&self) -> &str {
        &self.status_date
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    /// Not present in the current dashboard format; always `None`.
    pub fn application_type(&self) -> Option<&str> {
        self.application_type.as_deref()
    }

    /// Not present in the current dashboard format; always `None`.
    pub fn assigned_staff(&self) -> Option<&str> {
        self.assigned_staff.as_deref()
    }

    pub fn sys_ref(&self) -> &str {
        &self.sys_ref
    }

    /// Archive tag supplied by the caller ("Active", "Archived").
    pub fn archived(&self) -> &str {
        &self.archived
    }
}

/// Records produced by one scrape pass, in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct RunBatch {
    records: Vec<ProjectRecord>,
}

impl RunBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, record: ProjectRecord) {
        self.records.push(record);
    }

    /// Append another batch, keeping its order after the existing records.
    pub fn append(&mut self, other: RunBatch) {
        self.records.extend(other.records);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProjectRecord> {
        self.records.iter()
    }

    pub fn records(&self) -> &[ProjectRecord] {
        &self.records
    }
}

impl From<Vec<ProjectRecord>> for RunBatch {
    fn from(records: Vec<ProjectRecord>) -> Self {
        Self { records }
    }
}

impl<'a> IntoIterator for &'a RunBatch {
    type Item = &'a ProjectRecord;
    type IntoIter = std::slice::Iter<'a, ProjectRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.records.iter()
    }
}
