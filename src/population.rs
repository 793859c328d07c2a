//! Synthetic user population
//!
//! A [`Population`] is an ordered set of [`UserRecord`] rows plus the set of columns
//! that pipeline stages have materialized. Addressing a column before its stage has
//! run is a [`SimError::MissingColumn`], mirroring a data frame lookup.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::assignment::Variant;
use crate::errors::{Result, SimError};

/// Device category covariate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Device {
    Mobile,
    Desktop,
}

/// Acquisition channel covariate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Search,
    Social,
}

/// Addressable columns of a population
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Column {
    UserId,
    IsNew,
    Device,
    Channel,
    Variant,
    #[serde(rename = "exposed_B")]
    Exposed,
    Day,
    PSignup,
    SignedUp,
    #[serde(rename = "p_purchase_given_signup")]
    PPurchase,
    Purchased,
}

impl Column {
    /// Columns produced by user generation
    pub const BASE: [Column; 4] = [Column::UserId, Column::IsNew, Column::Device, Column::Channel];

    pub fn name(&self) -> &'static str {
        match self {
            Column::UserId => "user_id",
            Column::IsNew => "is_new",
            Column::Device => "device",
            Column::Channel => "channel",
            Column::Variant => "variant",
            Column::Exposed => "exposed_B",
            Column::Day => "day",
            Column::PSignup => "p_signup",
            Column::SignedUp => "signed_up",
            Column::PPurchase => "p_purchase_given_signup",
            Column::Purchased => "purchased",
        }
    }

    /// Whether the column holds a 0/1 outcome usable by the analysis engine
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            Column::IsNew | Column::Exposed | Column::SignedUp | Column::Purchased
        )
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Column {
    type Err = SimError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "user_id" => Ok(Column::UserId),
            "is_new" => Ok(Column::IsNew),
            "device" => Ok(Column::Device),
            "channel" => Ok(Column::Channel),
            "variant" => Ok(Column::Variant),
            "exposed_B" | "exposed" => Ok(Column::Exposed),
            "day" => Ok(Column::Day),
            "p_signup" => Ok(Column::PSignup),
            "signed_up" => Ok(Column::SignedUp),
            "p_purchase_given_signup" | "p_purchase" => Ok(Column::PPurchase),
            "purchased" => Ok(Column::Purchased),
            other => Err(SimError::MissingColumn(other.to_string())),
        }
    }
}

/// One synthetic user
///
/// Stage-produced fields stay `None` until their stage runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub user_id: u64,
    pub is_new: bool,
    pub device: Device,
    pub channel: Channel,
    pub variant: Option<Variant>,
    pub exposed: Option<bool>,
    pub day: Option<u32>,
    pub p_signup: Option<f64>,
    pub signed_up: Option<bool>,
    pub p_purchase: Option<f64>,
    pub purchased: Option<bool>,
}

impl UserRecord {
    pub fn new(user_id: u64, is_new: bool, device: Device, channel: Channel) -> Self {
        Self {
            user_id,
            is_new,
            device,
            channel,
            variant: None,
            exposed: None,
            day: None,
            p_signup: None,
            signed_up: None,
            p_purchase: None,
            purchased: None,
        }
    }

    /// Value of a binary column, `None` if the column is not binary or not yet set
    pub fn binary(&self, column: Column) -> Option<bool> {
        match column {
            Column::IsNew => Some(self.is_new),
            Column::Exposed => self.exposed,
            Column::SignedUp => self.signed_up,
            Column::Purchased => self.purchased,
            _ => None,
        }
    }

    fn has(&self, column: Column) -> bool {
        match column {
            Column::UserId | Column::IsNew | Column::Device | Column::Channel => true,
            Column::Variant => self.variant.is_some(),
            Column::Exposed => self.exposed.is_some(),
            Column::Day => self.day.is_some(),
            Column::PSignup => self.p_signup.is_some(),
            Column::SignedUp => self.signed_up.is_some(),
            Column::PPurchase => self.p_purchase.is_some(),
            Column::Purchased => self.purchased.is_some(),
        }
    }
}

/// Ordered rows plus the columns materialized so far
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Population {
    users: Vec<UserRecord>,
    columns: BTreeSet<Column>,
}

impl Population {
    /// Population holding only the generated covariate columns
    pub fn new(users: Vec<UserRecord>) -> Self {
        Self {
            users,
            columns: Column::BASE.into_iter().collect(),
        }
    }

    /// Build a population from externally prepared rows
    ///
    /// A stage column counts as present only when every row carries a value for it.
    pub fn from_records(users: Vec<UserRecord>) -> Self {
        let columns = [
            Column::Variant,
            Column::Exposed,
            Column::Day,
            Column::PSignup,
            Column::SignedUp,
            Column::PPurchase,
            Column::Purchased,
        ]
        .into_iter()
        .filter(|&c| !users.is_empty() && users.iter().all(|u| u.has(c)))
        .chain(Column::BASE)
        .collect();

        Self { users, columns }
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn users(&self) -> &[UserRecord] {
        &self.users
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserRecord> {
        self.users.iter()
    }

    pub fn has_column(&self, column: Column) -> bool {
        self.columns.contains(&column)
    }

    pub fn columns(&self) -> impl Iterator<Item = Column> + '_ {
        self.columns.iter().copied()
    }

    /// Fail with `MissingColumn` unless the column is materialized
    pub fn require(&self, column: Column) -> Result<()> {
        if self.has_column(column) {
            Ok(())
        } else {
            Err(SimError::MissingColumn(column.name().to_string()))
        }
    }

    /// Mutable rows for a pipeline stage that is about to materialize `produced`
    pub(crate) fn stage_mut(&mut self, produced: &[Column]) -> &mut [UserRecord] {
        self.columns.extend(produced.iter().copied());
        &mut self.users
    }

    /// Number of rows carrying the given arm label
    pub fn count_variant(&self, group_column: Column, label: Variant) -> Result<u64> {
        self.require_group(group_column)?;
        Ok(self
            .users
            .iter()
            .filter(|u| u.variant == Some(label))
            .count() as u64)
    }

    /// Rows of an arm and how many of them have the binary outcome set
    pub fn count_outcome(
        &self,
        group_column: Column,
        outcome: Column,
        label: Variant,
    ) -> Result<(u64, u64)> {
        self.require_group(group_column)?;
        self.require(outcome)?;
        if !outcome.is_binary() {
            return Err(SimError::invalid_config(
                "outcome_column",
                format!("'{outcome}' is not a binary column"),
            ));
        }

        let (n, conversions) = self
            .users
            .iter()
            .filter(|u| u.variant == Some(label))
            .fold((0u64, 0u64), |(n, conv), u| {
                let hit = u.binary(outcome).unwrap_or(false);
                (n + 1, conv + u64::from(hit))
            });
        Ok((n, conversions))
    }

    /// Realized share of an arm that was actually exposed to treatment
    pub fn exposure_rate(&self, label: Variant) -> Result<Option<f64>> {
        self.require(Column::Variant)?;
        self.require(Column::Exposed)?;

        let (n, exposed) = self
            .users
            .iter()
            .filter(|u| u.variant == Some(label))
            .fold((0u64, 0u64), |(n, e), u| {
                (n + 1, e + u64::from(u.exposed.unwrap_or(false)))
            });

        Ok((n > 0).then(|| exposed as f64 / n as f64))
    }

    /// Subset of rows where a binary column is set, e.g. signed-up users only
    pub fn filter_column(&self, column: Column) -> Result<Population> {
        self.require(column)?;
        if !column.is_binary() {
            return Err(SimError::invalid_config(
                "filter_column",
                format!("'{column}' is not a binary column"),
            ));
        }

        Ok(Population {
            users: self
                .users
                .iter()
                .filter(|u| u.binary(column).unwrap_or(false))
                .cloned()
                .collect(),
            columns: self.columns.clone(),
        })
    }

    fn require_group(&self, group_column: Column) -> Result<()> {
        if group_column != Column::Variant {
            return Err(SimError::invalid_config(
                "group_column",
                format!("'{group_column}' does not hold arm labels"),
            ));
        }
        self.require(group_column)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user_id: u64, variant: Variant, signed_up: bool) -> UserRecord {
        UserRecord {
            variant: Some(variant),
            signed_up: Some(signed_up),
            ..UserRecord::new(user_id, true, Device::Mobile, Channel::Search)
        }
    }

    #[test]
    fn test_new_population_has_only_base_columns() {
        let pop = Population::new(vec![UserRecord::new(1, false, Device::Desktop, Channel::Social)]);
        assert!(pop.has_column(Column::Device));
        assert!(!pop.has_column(Column::Variant));
        assert_eq!(
            pop.require(Column::SignedUp),
            Err(SimError::MissingColumn("signed_up".to_string()))
        );
    }

    #[test]
    fn test_from_records_infers_columns() {
        let pop = Population::from_records(vec![
            record(1, Variant::A, true),
            record(2, Variant::B, false),
        ]);
        assert!(pop.has_column(Column::Variant));
        assert!(pop.has_column(Column::SignedUp));
        assert!(!pop.has_column(Column::Purchased));
    }

    #[test]
    fn test_partial_column_is_missing() {
        let mut users = vec![record(1, Variant::A, true), record(2, Variant::B, false)];
        users[1].signed_up = None;
        let pop = Population::from_records(users);
        assert!(!pop.has_column(Column::SignedUp));
    }

    #[test]
    fn test_count_outcome() {
        let pop = Population::from_records(vec![
            record(1, Variant::A, true),
            record(2, Variant::A, false),
            record(3, Variant::B, true),
        ]);
        assert_eq!(
            pop.count_outcome(Column::Variant, Column::SignedUp, Variant::A)
                .unwrap(),
            (2, 1)
        );
        assert_eq!(
            pop.count_outcome(Column::Variant, Column::SignedUp, Variant::B)
                .unwrap(),
            (1, 1)
        );
    }

    #[test]
    fn test_non_binary_outcome_rejected() {
        let pop = Population::from_records(vec![record(1, Variant::A, true)]);
        let err = pop
            .count_outcome(Column::Variant, Column::UserId, Variant::A)
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_filter_keeps_columns_and_order() {
        let pop = Population::from_records(vec![
            record(1, Variant::A, true),
            record(2, Variant::B, false),
            record(3, Variant::B, true),
        ]);
        let signed = pop.filter_column(Column::SignedUp).unwrap();
        let ids: Vec<u64> = signed.iter().map(|u| u.user_id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(signed.has_column(Column::SignedUp));
    }

    #[test]
    fn test_column_names_round_trip() {
        for column in [Column::Variant, Column::Exposed, Column::SignedUp, Column::PPurchase] {
            assert_eq!(column.name().parse::<Column>().unwrap(), column);
        }
        assert_eq!(
            "revenue".parse::<Column>(),
            Err(SimError::MissingColumn("revenue".to_string()))
        );
    }
}
