//! Dated backup branch naming and retention planning.

use chrono::NaiveDate;
use regex::Regex;
use std::sync::OnceLock;

pub const BACKUP_PREFIX: &str = "backup-";
const DATE_FORMAT: &str = "%Y-%m-%d";

/// A remote backup branch named `backup-YYYY-MM-DD`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupBranch {
    pub name: String,
    pub date: NaiveDate,
}

impl BackupBranch {
    /// Parse a branch name, returning `None` for anything not following the scheme.
    pub fn parse(name: &str) -> Option<Self> {
        let date = name.strip_prefix(BACKUP_PREFIX)?;
        let date = NaiveDate::parse_from_str(date, DATE_FORMAT).ok()?;
        Some(Self {
            name: name.to_string(),
            date,
        })
    }
}

/// `backup-<date>` for the given day.
pub fn backup_branch_name(date: NaiveDate) -> String {
    format!("{}{}", BACKUP_PREFIX, date.format(DATE_FORMAT))
}

fn backup_ref() -> &'static Regex {
    static BACKUP_REF: OnceLock<Regex> = OnceLock::new();
    BACKUP_REF.get_or_init(|| {
        Regex::new(r"refs/heads/(backup-\d{4}-\d{2}-\d{2})$").expect("Invalid backup ref regex")
    })
}

/// Backup branches in `git ls-remote --heads` output.
///
/// Lines that do not name a `backup-YYYY-MM-DD` head, or whose date is not a
/// real calendar day, are ignored.
pub fn parse_backup_branches(ls_remote_output: &str) -> Vec<BackupBranch> {
    ls_remote_output
        .lines()
        .filter_map(|line| backup_ref().captures(line.trim()))
        .filter_map(|caps| caps.get(1))
        .filter_map(|name| BackupBranch::parse(name.as_str()))
        .collect()
}

/// Which backup branches to keep and which to delete.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    pub keep: Vec<BackupBranch>,
    pub delete: Vec<BackupBranch>,
}

/// Keep the `retention` most recent branches, newest first; the rest are deleted.
pub fn plan_retention(mut branches: Vec<BackupBranch>, retention: usize) -> RetentionPlan {
    branches.sort_by(|a, b| b.date.cmp(&a.date));
    let delete = branches.split_off(retention.min(branches.len()));
    RetentionPlan {
        keep: branches,
        delete,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ls_remote(dates: impl IntoIterator<Item = String>) -> String {
        dates
            .into_iter()
            .map(|d| format!("0123456789abcdef\trefs/heads/backup-{}\n", d))
            .collect()
    }

    #[test]
    fn test_backup_branch_name() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 7).unwrap();
        assert_eq!(backup_branch_name(date), "backup-2024-03-07");
    }

    #[test]
    fn test_fifteen_days_keep_ten() {
        let output = ls_remote((1..=15).map(|d| format!("2024-01-{:02}", d)));
        let plan = plan_retention(parse_backup_branches(&output), 10);

        let kept: Vec<&str> = plan.keep.iter().map(|b| b.name.as_str()).collect();
        let deleted: Vec<&str> = plan.delete.iter().map(|b| b.name.as_str()).collect();

        assert_eq!(kept.len(), 10);
        assert_eq!(kept.first(), Some(&"backup-2024-01-15"));
        assert_eq!(kept.last(), Some(&"backup-2024-01-06"));
        assert_eq!(
            deleted,
            vec![
                "backup-2024-01-05",
                "backup-2024-01-04",
                "backup-2024-01-03",
                "backup-2024-01-02",
                "backup-2024-01-01",
            ]
        );
    }

    #[test]
    fn test_malformed_and_foreign_branches_untouched() {
        let output = "\
aaa\trefs/heads/main
bbb\trefs/heads/backup-2024-02-30
ccc\trefs/heads/backup-latest
ddd\trefs/heads/backup-2024-01-01-extra
eee\trefs/heads/backup-2024-01-02
";
        let branches = parse_backup_branches(output);
        assert_eq!(branches.len(), 1);
        assert_eq!(branches[0].name, "backup-2024-01-02");

        let plan = plan_retention(branches, 0);
        assert!(plan.keep.is_empty());
        assert_eq!(plan.delete.len(), 1);
    }

    #[test]
    fn test_fewer_than_retention_keeps_all() {
        let output = ls_remote(["2024-05-01".to_string(), "2024-04-30".to_string()]);
        let plan = plan_retention(parse_backup_branches(&output), 10);
        assert_eq!(plan.keep.len(), 2);
        assert!(plan.delete.is_empty());
    }
}
