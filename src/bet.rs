//! Bet record and the lottery win predicate.

use chrono::NaiveDate;

use crate::error::{LotteryError, Result};
use crate::protocol::DATE_SIZE;

/// Winning number used by the draw unless configured otherwise.
pub const LOTTERY_WINNER_NUMBER: u32 = 7574;

/// Date layout on the wire and in datasets.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A single bet placed through an agency.
///
/// Immutable once constructed; read it through the accessors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bet {
    agency: u32,
    first_name: String,
    last_name: String,
    document: u32,
    birth_date: NaiveDate,
    number: u32,
}

impl Bet {
    /// Create a new bet.
    pub fn new(
        agency: u32,
        first_name: impl Into<String>,
        last_name: impl Into<String>,
        document: u32,
        birth_date: NaiveDate,
        number: u32,
    ) -> Self {
        Self {
            agency,
            first_name: first_name.into(),
            last_name: last_name.into(),
            document,
            birth_date,
            number,
        }
    }

    #[inline]
    pub fn agency(&self) -> u32 {
        self.agency
    }

    #[inline]
    pub fn first_name(&self) -> &str {
        &self.first_name
    }

    #[inline]
    pub fn last_name(&self) -> &str {
        &self.last_name
    }

    #[inline]
    pub fn document(&self) -> u32 {
        self.document
    }

    #[inline]
    pub fn birth_date(&self) -> NaiveDate {
        self.birth_date
    }

    #[inline]
    pub fn number(&self) -> u32 {
        self.number
    }

    /// Whether this bet wins a draw for `winning_number`.
    #[inline]
    pub fn has_won(&self, winning_number: u32) -> bool {
        self.number == winning_number
    }

    /// Birth date rendered as the fixed 10-byte wire form.
    ///
    /// Fails with `Format` for dates outside years 0000-9999, which chrono
    /// renders with a sign or a fifth digit.
    pub fn birth_date_bytes(&self) -> Result<[u8; DATE_SIZE]> {
        let formatted = self.birth_date.format(DATE_FORMAT).to_string();
        formatted.as_bytes().try_into().map_err(|_| {
            LotteryError::Format(format!(
                "birth date {:?} is not {} bytes",
                formatted, DATE_SIZE
            ))
        })
    }

    /// Encoded size of this bet's body.
    ///
    /// Checks the birth date so that callers sizing a batch find encoding
    /// failures before anything is queued for sending.
    pub fn encoded_len(&self) -> Result<usize> {
        self.birth_date_bytes()?;
        // agency, two length-prefixed names, document, date, number
        Ok(4 + (4 + self.first_name.len()) + (4 + self.last_name.len()) + 4 + DATE_SIZE + 4)
    }
}

/// Parse a `YYYY-MM-DD` date.
pub fn parse_birth_date(text: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .map_err(|e| LotteryError::Format(format!("invalid birth date {:?}: {}", text, e)))
}
