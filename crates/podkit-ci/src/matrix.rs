//! Strategy matrices: expansion into job cells and exclusion audits.
//!
//! Expansion follows hosted-runner semantics. The cross product of the axes
//! is taken in declaration order, `exclude` entries remove every cell they
//! match, and `include` entries are applied last. An include may add keys to
//! matching cells, but it never overwrites an original axis value; when it
//! cannot be merged anywhere it becomes a cell of its own.

use indexmap::IndexMap;
use serde::de::Deserializer;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A scalar matrix value, kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct MatrixValue(pub String);

impl MatrixValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MatrixValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MatrixValue {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl<'de> Deserialize<'de> for MatrixValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Integer(i64),
            Float(f64),
            Flag(bool),
        }

        Ok(MatrixValue(match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s,
            Raw::Integer(i) => i.to_string(),
            Raw::Float(x) => x.to_string(),
            Raw::Flag(b) => b.to_string(),
        }))
    }
}

/// A full or partial assignment of axis names to values.
pub type Combination = IndexMap<String, MatrixValue>;

/// Whether every key in `rule` has the same value in `values`.
pub fn rule_matches(rule: &Combination, values: &Combination) -> bool {
    rule.iter().all(|(key, value)| values.get(key) == Some(value))
}

/// `strategy.matrix` of a job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Matrix {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<Combination>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<Combination>,
    #[serde(flatten)]
    pub axes: IndexMap<String, Vec<MatrixValue>>,
}

/// How a cell came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CellOrigin {
    /// Survived the cross product and exclusions
    Product,
    /// Appended by an `include` entry
    Included,
}

/// One expanded job configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Cell {
    pub values: Combination,
    pub origin: CellOrigin,
}

impl Cell {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(MatrixValue::as_str)
    }

    pub fn matches(&self, rule: &Combination) -> bool {
        rule_matches(rule, &self.values)
    }

    /// `key=value` pairs in axis order.
    pub fn label(&self) -> String {
        if self.values.is_empty() {
            return "(default)".to_string();
        }
        self.values
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Short stable identifier derived from the label.
    pub fn id(&self) -> String {
        let digest = Sha256::digest(self.label().as_bytes());
        hex::encode(digest)[..12].to_string()
    }
}

impl Matrix {
    /// Raw cross product of the axes, before exclusions.
    ///
    /// A matrix with no axes has no product; its cells, if any, come from
    /// `include` entries.
    pub fn product(&self) -> Vec<Combination> {
        if self.axes.is_empty() {
            return Vec::new();
        }
        let mut combos = vec![Combination::new()];
        for (axis, values) in &self.axes {
            combos = combos
                .into_iter()
                .flat_map(|combo| {
                    values.iter().map(move |value| {
                        let mut next = combo.clone();
                        next.insert(axis.clone(), value.clone());
                        next
                    })
                })
                .collect();
        }
        combos
    }

    pub fn is_excluded(&self, values: &Combination) -> bool {
        self.exclude.iter().any(|rule| rule_matches(rule, values))
    }

    /// Expand into the cells that will actually run.
    pub fn expand(&self) -> Vec<Cell> {
        let mut cells: Vec<Cell> = self
            .product()
            .into_iter()
            .filter(|combo| !self.is_excluded(combo))
            .map(|values| Cell {
                values,
                origin: CellOrigin::Product,
            })
            .collect();

        let product_len = cells.len();
        for include in &self.include {
            let mut merged = false;
            for cell in cells.iter_mut().take(product_len) {
                if self.merges_into(include, cell) {
                    for (key, value) in include {
                        cell.values.insert(key.clone(), value.clone());
                    }
                    merged = true;
                }
            }
            if !merged {
                cells.push(Cell {
                    values: include.clone(),
                    origin: CellOrigin::Included,
                });
            }
        }
        cells
    }

    // Original axis values must agree; added keys may be overwritten.
    fn merges_into(&self, include: &Combination, cell: &Cell) -> bool {
        include.iter().all(|(key, value)| {
            !self.axes.contains_key(key) || cell.values.get(key) == Some(value)
        })
    }

    /// Check the exclusion rules against the expansion.
    pub fn audit(&self) -> MatrixAudit {
        let mut findings = Vec::new();
        let product = self.product();

        for (index, rule) in self.exclude.iter().enumerate() {
            let mut names_unknown = false;
            for (key, value) in rule {
                match self.axes.get(key) {
                    None => {
                        names_unknown = true;
                        findings.push(Finding::new(
                            FindingKind::UnknownAxis,
                            format!("exclude[{}] names unknown axis '{}'", index, key),
                        ));
                    }
                    Some(values) if !values.contains(value) => {
                        names_unknown = true;
                        findings.push(Finding::new(
                            FindingKind::UnknownValue,
                            format!(
                                "exclude[{}] value '{}' is not a value of axis '{}'",
                                index, value, key
                            ),
                        ));
                    }
                    Some(_) => {}
                }
            }

            if !names_unknown && !product.iter().any(|combo| rule_matches(rule, combo)) {
                findings.push(Finding::new(
                    FindingKind::DeadExclude,
                    format!("exclude[{}] matches no combination", index),
                ));
            }

            // A more general rule (a subset of this one) already removes everything this one does.
            let subsumed_by = self.exclude.iter().enumerate().find(|(other, general)| {
                *other != index
                    && general.len() <= rule.len()
                    && rule_matches(general, rule)
                    && (general.len() < rule.len() || *other < index)
            });
            if let Some((other, _)) = subsumed_by {
                findings.push(Finding::new(
                    FindingKind::RedundantExclude,
                    format!("exclude[{}] is subsumed by exclude[{}]", index, other),
                ));
            }
        }

        for cell in self.expand() {
            if let Some(rule) = self.exclude.iter().position(|rule| cell.matches(rule)) {
                findings.push(Finding::new(
                    FindingKind::Reintroduced,
                    format!("include re-introduces {} excluded by exclude[{}]", cell.label(), rule),
                ));
            }
        }

        if self.expand().is_empty() {
            findings.push(Finding::new(
                FindingKind::EmptyMatrix,
                "matrix expands to no jobs".to_string(),
            ));
        }

        MatrixAudit { findings }
    }

    /// Expanded cells that match an exclude rule, with the rule's index.
    pub fn verify_exclusions(&self) -> std::result::Result<(), Vec<(Cell, usize)>> {
        let violations: Vec<(Cell, usize)> = self
            .expand()
            .into_iter()
            .filter_map(|cell| {
                self.exclude
                    .iter()
                    .position(|rule| cell.matches(rule))
                    .map(|rule| (cell, rule))
            })
            .collect();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(violations)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingKind {
    UnknownAxis,
    UnknownValue,
    DeadExclude,
    RedundantExclude,
    Reintroduced,
    EmptyMatrix,
    ZeroParallel,
}

impl FindingKind {
    /// Errors change which jobs run; the rest are hygiene.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            FindingKind::UnknownAxis
                | FindingKind::Reintroduced
                | FindingKind::EmptyMatrix
                | FindingKind::ZeroParallel
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Finding {
    pub kind: FindingKind,
    pub message: String,
}

impl Finding {
    pub fn new(kind: FindingKind, message: String) -> Self {
        Self { kind, message }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = if self.kind.is_error() { "error" } else { "warning" };
        write!(f, "{}: {}", level, self.message)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatrixAudit {
    pub findings: Vec<Finding>,
}

impl MatrixAudit {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn has_errors(&self) -> bool {
        self.findings.iter().any(|f| f.kind.is_error())
    }

    pub fn has(&self, kind: FindingKind) -> bool {
        self.findings.iter().any(|f| f.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matrix(yaml: &str) -> Matrix {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn combo(pairs: &[(&str, &str)]) -> Combination {
        pairs.iter().map(|(k, v)| (k.to_string(), MatrixValue::from(*v))).collect()
    }

    #[test]
    fn test_product_follows_declaration_order() {
        let m = matrix("os: [linux, mac]\npy: ['3.10', 3.11]\n");
        let product = m.product();
        assert_eq!(product.len(), 4);
        assert_eq!(product[0], combo(&[("os", "linux"), ("py", "3.10")]));
        assert_eq!(product[1], combo(&[("os", "linux"), ("py", "3.11")]));
        assert_eq!(product[3], combo(&[("os", "mac"), ("py", "3.11")]));
    }

    #[test]
    fn test_scalar_values_are_text() {
        let m = matrix("n: [1, 2.5, true]\n");
        let values: Vec<&str> = m.axes["n"].iter().map(MatrixValue::as_str).collect();
        assert_eq!(values, vec!["1", "2.5", "true"]);
    }

    #[test]
    fn test_exclude_matches_partial_assignment() {
        let m = matrix("os: [linux, mac]\nroot: [/usr, /Users]\nexclude:\n  - os: linux\n    root: /Users\n");
        let cells = m.expand();
        assert_eq!(cells.len(), 3);
        assert!(cells.iter().all(|c| !(c.get("os") == Some("linux") && c.get("root") == Some("/Users"))));
    }

    #[test]
    fn test_include_adds_keys_to_matching_cells() {
        let m = matrix("os: [linux, mac]\ninclude:\n  - os: mac\n    xquartz: 'yes'\n");
        let cells = m.expand();
        assert_eq!(cells.len(), 2);
        assert_eq!(cells[1].get("xquartz"), Some("yes"));
        assert_eq!(cells[0].get("xquartz"), None);
    }

    #[test]
    fn test_include_without_axis_keys_extends_every_cell() {
        let m = matrix("os: [linux, mac]\ninclude:\n  - shell: bash\n");
        assert!(m.expand().iter().all(|c| c.get("shell") == Some("bash")));
    }

    #[test]
    fn test_include_that_would_overwrite_is_appended() {
        let m = matrix("os: [linux, mac]\ninclude:\n  - os: windows\n");
        let cells = m.expand();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[2].origin, CellOrigin::Included);
        assert_eq!(cells[2].get("os"), Some("windows"));
    }

    #[test]
    fn test_empty_axis_yields_no_cells() {
        let m = matrix("os: []\n");
        assert!(m.expand().is_empty());
        assert!(m.audit().has(FindingKind::EmptyMatrix));
    }

    #[test]
    fn test_audit_flags_unknown_axis_and_value() {
        let m = matrix("os: [linux, mac]\nexclude:\n  - arch: arm\n  - os: windows\n");
        let audit = m.audit();
        assert!(audit.has(FindingKind::UnknownAxis));
        assert!(audit.has(FindingKind::UnknownValue));
        assert!(!audit.has(FindingKind::DeadExclude));
        assert!(audit.has_errors());
    }

    #[test]
    fn test_audit_flags_dead_and_redundant_excludes() {
        let m = matrix(
            "os: [linux, mac]\nroot: [/usr, /Users]\nexclude:\n  - os: linux\n  - os: linux\n    root: /usr\n",
        );
        let audit = m.audit();
        assert!(audit.has(FindingKind::RedundantExclude));
        assert!(!audit.has(FindingKind::DeadExclude));
        assert!(!audit.has_errors());
    }

    #[test]
    fn test_duplicate_excludes_report_the_later_one() {
        let m = matrix("os: [linux, mac]\nexclude:\n  - os: linux\n  - os: linux\n");
        let audit = m.audit();
        let redundant: Vec<&Finding> = audit
            .findings
            .iter()
            .filter(|f| f.kind == FindingKind::RedundantExclude)
            .collect();
        assert_eq!(redundant.len(), 1);
        assert!(redundant[0].message.starts_with("exclude[1]"));
    }

    #[test]
    fn test_include_reintroducing_excluded_cell() {
        let m = matrix(
            "os: [linux, mac]\nroot: [/usr, /Users]\nexclude:\n  - os: linux\n    root: /Users\ninclude:\n  - os: linux\n    root: /Users\n",
        );
        assert!(m.audit().has(FindingKind::Reintroduced));
        let violations = m.verify_exclusions().unwrap_err();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].1, 0);
    }

    #[test]
    fn test_clean_matrix() {
        let m = matrix("os: [linux, mac]\nroot: [/usr, /Users]\nexclude:\n  - os: linux\n    root: /Users\n");
        assert!(m.audit().is_clean());
        assert!(m.verify_exclusions().is_ok());
    }

    #[test]
    fn test_cell_label_and_id() {
        let cell = Cell {
            values: combo(&[("os", "linux"), ("root", "/usr")]),
            origin: CellOrigin::Product,
        };
        assert_eq!(cell.label(), "os=linux, root=/usr");
        assert_eq!(cell.id().len(), 12);
        assert_eq!(cell.id(), cell.clone().id());
    }
}
