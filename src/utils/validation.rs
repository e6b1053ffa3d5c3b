//! Validation utilities

use crate::traits::*;
use crate::types::*;

/// Validate that an account name is valid
pub fn validate_account_name(name: &str) -> LedgerResult<()> {
    if name.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Account name cannot be empty".to_string(),
        ));
    }

    if name.len() > 100 {
        return Err(LedgerError::Validation(
            "Account name cannot exceed 100 characters".to_string(),
        ));
    }

    Ok(())
}

/// Validate that a transaction description is valid
pub fn validate_transaction_description(description: &str) -> LedgerResult<()> {
    if description.trim().is_empty() {
        return Err(LedgerError::Validation(
            "Transaction description cannot be empty".to_string(),
        ));
    }

    if description.len() > 500 {
        return Err(LedgerError::Validation(
            "Transaction description cannot exceed 500 characters".to_string(),
        ));
    }

    Ok(())
}

/// Three uppercase ASCII letters, e.g. `USD`
pub fn validate_currency_code(code: &str) -> LedgerResult<()> {
    if code.len() == 3 && code.chars().all(|c| c.is_ascii_uppercase()) {
        Ok(())
    } else {
        Err(LedgerError::Validation(format!(
            "'{code}' is not a three-letter currency code"
        )))
    }
}

/// Stricter transaction validator for callers that want more than the
/// double-entry checks
pub struct EnhancedTransactionValidator;

impl TransactionValidator for EnhancedTransactionValidator {
    fn validate_transaction(&self, request: &NewTransaction) -> LedgerResult<()> {
        request.validate()?;

        validate_transaction_description(&request.description)?;
        validate_currency_code(&request.currency)?;

        // Same account cannot appear twice on the same side
        let mut seen = std::collections::HashSet::new();
        for line in &request.entries {
            if !seen.insert((line.account_id, line.entry_type)) {
                return Err(LedgerError::Validation(format!(
                    "Account '{}' appears multiple times with the same entry type in transaction",
                    line.account_id
                )));
            }
        }

        Ok(())
    }
}

/// Enhanced account validator with detailed checks
pub struct EnhancedAccountValidator;

impl AccountValidator for EnhancedAccountValidator {
    fn validate_account(&self, account: &Account) -> LedgerResult<()> {
        validate_account_name(&account.name)?;
        if let Some(description) = &account.description {
            if description.len() > 500 {
                return Err(LedgerError::Validation(
                    "Account description cannot exceed 500 characters".to_string(),
                ));
            }
        }
        Ok(())
    }
}
