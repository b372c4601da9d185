// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Write-time validation and sanitization of records.
//!
//! Every record passes through [`RecordSchema::sanitize`] before it reaches
//! the storage engine. Declared string fields are trimmed and checked against
//! their length ceilings; fields the schema does not declare pass through
//! unchanged.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::Record;

pub const DEFAULT_TITLE_MAX_CHARS: usize = 500;
pub const DEFAULT_CONTENT_MAX_CHARS: usize = 500_000;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
	pub name: String,
	#[serde(default)]
	pub required: bool,
	#[serde(default)]
	pub max_chars: Option<usize>,
}

impl FieldRule {
	pub fn required(name: impl Into<String>, max_chars: usize) -> Self {
		Self {
			name: name.into(),
			required: true,
			max_chars: Some(max_chars),
		}
	}

	pub fn optional(name: impl Into<String>, max_chars: usize) -> Self {
		Self {
			name: name.into(),
			required: false,
			max_chars: Some(max_chars),
		}
	}
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSchema {
	pub fields: Vec<FieldRule>,
}

impl Default for RecordSchema {
	fn default() -> Self {
		Self {
			fields: vec![
				FieldRule::required("title", DEFAULT_TITLE_MAX_CHARS),
				FieldRule::optional("content", DEFAULT_CONTENT_MAX_CHARS),
			],
		}
	}
}

/// A record that was dropped from a write batch.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedRecord {
	pub id: Option<String>,
	pub errors: Vec<String>,
}

impl RejectedRecord {
	pub fn display_id(&self) -> &str {
		self.id.as_deref().unwrap_or("<unknown>")
	}
}

/// Outcome of a batch write: how many records were committed and which were not.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SaveReport {
	pub accepted: usize,
	pub rejected: Vec<RejectedRecord>,
}

impl RecordSchema {
	/// Returns the sanitized record, or the reasons it cannot be stored.
	pub fn sanitize(&self, mut record: Record) -> Result<Record, RejectedRecord> {
		let mut errors = Vec::new();

		if record.id.as_str().trim().is_empty() {
			errors.push("id is required".to_string());
		}

		for rule in &self.fields {
			match record.fields.get_mut(&rule.name) {
				None | Some(Value::Null) => {
					if rule.required {
						errors.push(format!("{} is required", rule.name));
					}
				}
				Some(Value::String(s)) => {
					let trimmed = s.trim();
					if rule.required && trimmed.is_empty() {
						errors.push(format!("{} is required", rule.name));
						continue;
					}
					if let Some(max) = rule.max_chars {
						let len = trimmed.chars().count();
						if len > max {
							errors.push(format!(
								"{} exceeds {max} characters (got {len})",
								rule.name
							));
							continue;
						}
					}
					if trimmed.len() != s.len() {
						*s = trimmed.to_string();
					}
				}
				Some(_) => errors.push(format!("{} must be a string", rule.name)),
			}
		}

		if errors.is_empty() {
			Ok(record)
		} else {
			let id = Some(record.id.as_str().to_string()).filter(|id| !id.trim().is_empty());
			Err(RejectedRecord { id, errors })
		}
	}

	/// Splits a batch into sanitized records and rejections, preserving order.
	pub fn partition(&self, records: Vec<Record>) -> (Vec<Record>, Vec<RejectedRecord>) {
		let mut accepted = Vec::with_capacity(records.len());
		let mut rejected = Vec::new();

		for record in records {
			match self.sanitize(record) {
				Ok(record) => accepted.push(record),
				Err(rejection) => rejected.push(rejection),
			}
		}

		(accepted, rejected)
	}
}
