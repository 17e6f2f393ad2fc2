//! Profit and earnings-ratio calculation behind `POST /calculate`.

use crate::error::FinancialError;
use serde::{Deserialize, Serialize};
use validator::Validate;

pub const DEFAULT_ROUNDING_DIGITS: u32 = 2;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct FinancialRawInfo {
    #[validate(range(min = 0, message = "revenue must not be negative"))]
    pub revenue: i64,
    #[validate(range(min = 0, message = "expenses must not be negative"))]
    pub expenses: i64,
    #[validate(range(min = 0.0, max = 1.0, message = "taxRate must be between 0 and 1"))]
    #[serde(default)]
    pub tax_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinancialResultInfo {
    pub profit: f64,
    pub ratio: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FinancialService;

impl FinancialService {
    pub fn new() -> Self {
        Self
    }

    /// `profit = (revenue - expenses) * (1 - tax_rate)`, `ratio = ebt / profit`.
    pub fn calculate(
        &self,
        req: &FinancialRawInfo,
        rounding_digits: u32,
    ) -> Result<FinancialResultInfo, FinancialError> {
        let ebt = (req.revenue - req.expenses) as f64;
        let profit = ebt * (1.0 - req.tax_rate);
        let ratio = ebt / profit;
        if !ratio.is_finite() {
            return Err(FinancialError::UndefinedRatio(profit));
        }

        Ok(FinancialResultInfo {
            profit: round_float(profit, rounding_digits)?,
            ratio: round_float(ratio, rounding_digits)?,
        })
    }
}

pub fn round_float(val: f64, digits: u32) -> Result<f64, FinancialError> {
    if digits == 0 {
        return Err(FinancialError::InvalidDigits);
    }
    let base = 10f64.powi(digits as i32);
    Ok((val * base).round() / base)
}
