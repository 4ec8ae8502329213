//! Validation utilities

use crate::amount::MAX_LINE_MINOR_UNITS;
use crate::types::*;

/// Validate that a line or account identifier is usable
pub fn validate_identifier(kind: &str, id: &str) -> ReconciliationResult<()> {
    if id.trim().is_empty() {
        return Err(ReconciliationError::Validation(format!(
            "{} cannot be empty",
            kind
        )));
    }

    if id.len() > 64 {
        return Err(ReconciliationError::Validation(format!(
            "{} cannot exceed 64 characters",
            kind
        )));
    }

    Ok(())
}

/// Validate that an account ID is valid
pub fn validate_account_id(account_id: &str) -> ReconciliationResult<()> {
    validate_identifier("Account ID", account_id)?;

    // Check for valid characters (alphanumeric, dashes, underscores)
    if !account_id
        .chars()
        .all(|c| c.is_alphanumeric() || c == '-' || c == '_')
    {
        return Err(ReconciliationError::Validation(
            "Account ID can only contain alphanumeric characters, dashes, and underscores"
                .to_string(),
        ));
    }

    Ok(())
}

/// Validate a line before it enters the store
pub fn validate_line(line: &LedgerLine) -> ReconciliationResult<()> {
    validate_identifier("Line ID", &line.id)?;
    validate_account_id(&line.account_id)?;

    if !line.has_valid_amounts() {
        return Err(ReconciliationError::InvalidAmount(format!(
            "Line '{}' has a negative debit or credit amount, or one above {}",
            line.id, MAX_LINE_MINOR_UNITS
        )));
    }

    if line.reconciled != line.reconciliation_group_id.is_some() {
        return Err(ReconciliationError::Validation(format!(
            "Line '{}' has an inconsistent reconciliation mark",
            line.id
        )));
    }

    Ok(())
}

/// Validate a list of line ids passed in by a caller
pub fn validate_selection_ids(line_ids: &[String]) -> ReconciliationResult<()> {
    if line_ids.is_empty() {
        return Err(ReconciliationError::InsufficientSelection { selected: 0 });
    }

    for id in line_ids {
        validate_identifier("Line ID", id)?;
    }

    Ok(())
}
