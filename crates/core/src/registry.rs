use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flow::BranchRule;
use crate::model::{ModuleId, PageDescriptor, UnitId};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum RegistryError {
    #[error("unit {0} is not registered")]
    UnknownUnit(UnitId),

    #[error("unit {0} is already registered")]
    DuplicateUnit(UnitId),

    #[error("unit {0} has no pages")]
    EmptyUnit(UnitId),

    #[error("unit {unit}: page ids must run 1..={expected}, found {found} at position {position}")]
    NonContiguousPages {
        unit: UnitId,
        expected: u32,
        position: usize,
        found: u32,
    },

    #[error("unit {unit}: branch rule {rule} refers to page {page} outside the unit")]
    RuleOutsideUnit { unit: UnitId, rule: usize, page: u32 },

    #[error("unit {unit} has too many pages")]
    TooManyPages { unit: UnitId },

    #[error("invalid catalog: {0}")]
    InvalidCatalog(String),
}

/// Authored definition of a unit: its pages in order and its branch rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitDefinition {
    pub module_id: ModuleId,
    pub unit_id: UnitId,
    #[serde(default)]
    pub title: String,
    pub pages: Vec<PageDescriptor>,
    #[serde(default)]
    pub rules: Vec<BranchRule>,
}

impl UnitDefinition {
    #[must_use]
    pub fn new(module_id: ModuleId, unit_id: UnitId, title: impl Into<String>) -> Self {
        Self {
            module_id,
            unit_id,
            title: title.into(),
            pages: Vec::new(),
            rules: Vec::new(),
        }
    }

    /// Append a page; ids are assigned sequentially from 1.
    #[must_use]
    pub fn page(mut self, title: impl Into<String>, render: impl Into<String>) -> Self {
        let id = u32::try_from(self.pages.len() + 1).unwrap_or(u32::MAX);
        self.pages.push(PageDescriptor::new(id, title, render));
        self
    }

    #[must_use]
    pub fn rule(mut self, rule: BranchRule) -> Self {
        self.rules.push(rule);
        self
    }

    #[must_use]
    pub fn total_pages(&self) -> u32 {
        u32::try_from(self.pages.len()).unwrap_or(u32::MAX)
    }

    fn validate(&self) -> Result<(), RegistryError> {
        let unit = self.unit_id;
        if self.pages.is_empty() {
            return Err(RegistryError::EmptyUnit(unit));
        }
        let total = u32::try_from(self.pages.len()).map_err(|_| RegistryError::TooManyPages { unit })?;
        for (position, page) in self.pages.iter().enumerate() {
            let expected = u32::try_from(position + 1).map_err(|_| RegistryError::TooManyPages { unit })?;
            if page.id != expected {
                return Err(RegistryError::NonContiguousPages {
                    unit,
                    expected: total,
                    position,
                    found: page.id,
                });
            }
        }
        if let Some((rule, bad)) = self
            .rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.page == 0 || rule.page > total)
        {
            return Err(RegistryError::RuleOutsideUnit {
                unit,
                rule,
                page: bad.page,
            });
        }
        Ok(())
    }
}

/// Static catalog of units and their pages.
#[derive(Debug, Clone, Default)]
pub struct PageRegistry {
    units: BTreeMap<UnitId, UnitDefinition>,
}

impl PageRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry from a JSON array of unit definitions.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::InvalidCatalog` if the JSON cannot be decoded,
    /// or any registration error for the decoded units.
    pub fn from_json(catalog: &str) -> Result<Self, RegistryError> {
        let units: Vec<UnitDefinition> = serde_json::from_str(catalog)
            .map_err(|e| RegistryError::InvalidCatalog(e.to_string()))?;
        let mut registry = Self::new();
        for unit in units {
            registry.register(unit)?;
        }
        Ok(registry)
    }

    /// Register a unit.
    ///
    /// # Errors
    ///
    /// Rejects empty units, page ids that are not exactly `1..=n`, rules on
    /// pages outside the unit, and units registered twice.
    pub fn register(&mut self, unit: UnitDefinition) -> Result<(), RegistryError> {
        unit.validate()?;
        if self.units.contains_key(&unit.unit_id) {
            return Err(RegistryError::DuplicateUnit(unit.unit_id));
        }
        self.units.insert(unit.unit_id, unit);
        Ok(())
    }

    /// Builder-style [`PageRegistry::register`].
    ///
    /// # Errors
    ///
    /// Same as [`PageRegistry::register`].
    pub fn with_unit(mut self, unit: UnitDefinition) -> Result<Self, RegistryError> {
        self.register(unit)?;
        Ok(self)
    }

    /// Ordered pages of a unit.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::UnknownUnit` if the unit is not registered.
    pub fn resolve(&self, unit_id: UnitId) -> Result<&[PageDescriptor], RegistryError> {
        self.unit(unit_id).map(|unit| unit.pages.as_slice())
    }

    #[must_use]
    pub fn lookup(&self, unit_id: UnitId, page_id: u32) -> Option<&PageDescriptor> {
        let pages = self.units.get(&unit_id)?.pages.as_slice();
        let index = usize::try_from(page_id.checked_sub(1)?).ok()?;
        pages.get(index)
    }

    /// # Errors
    ///
    /// Returns `RegistryError::UnknownUnit` if the unit is not registered.
    pub fn total_pages(&self, unit_id: UnitId) -> Result<u32, RegistryError> {
        self.unit(unit_id).map(UnitDefinition::total_pages)
    }

    /// # Errors
    ///
    /// Returns `RegistryError::UnknownUnit` if the unit is not registered.
    pub fn unit(&self, unit_id: UnitId) -> Result<&UnitDefinition, RegistryError> {
        self.units
            .get(&unit_id)
            .ok_or(RegistryError::UnknownUnit(unit_id))
    }

    /// Units belonging to a module, in id order.
    pub fn units_in_module(&self, module_id: ModuleId) -> impl Iterator<Item = &UnitDefinition> {
        self.units
            .values()
            .filter(move |unit| unit.module_id == module_id)
    }

    #[must_use]
    pub fn modules(&self) -> BTreeSet<ModuleId> {
        self.units.values().map(|unit| unit.module_id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::BranchCondition;

    fn unit(id: u64, pages: usize) -> UnitDefinition {
        (1..=pages).fold(
            UnitDefinition::new(ModuleId::new(1), UnitId::new(id), format!("Unit {id}")),
            |unit, n| unit.page(format!("Page {n}"), format!("unit{id}/page{n}")),
        )
    }

    #[test]
    fn resolves_pages_in_order() {
        let registry = PageRegistry::new().with_unit(unit(1, 3)).unwrap();
        let pages = registry.resolve(UnitId::new(1)).unwrap();
        let ids: Vec<u32> = pages.iter().map(|p| p.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(registry.total_pages(UnitId::new(1)).unwrap(), 3);
    }

    #[test]
    fn lookup_handles_bounds() {
        let registry = PageRegistry::new().with_unit(unit(1, 2)).unwrap();
        assert_eq!(registry.lookup(UnitId::new(1), 2).unwrap().title, "Page 2");
        assert!(registry.lookup(UnitId::new(1), 0).is_none());
        assert!(registry.lookup(UnitId::new(1), 3).is_none());
        assert!(registry.lookup(UnitId::new(9), 1).is_none());
    }

    #[test]
    fn unknown_unit_is_an_error() {
        let registry = PageRegistry::new();
        assert_eq!(
            registry.resolve(UnitId::new(4)).unwrap_err(),
            RegistryError::UnknownUnit(UnitId::new(4))
        );
    }

    #[test]
    fn rejects_empty_and_duplicate_units() {
        let mut registry = PageRegistry::new();
        assert_eq!(
            registry.register(unit(1, 0)).unwrap_err(),
            RegistryError::EmptyUnit(UnitId::new(1))
        );
        registry.register(unit(1, 2)).unwrap();
        assert_eq!(
            registry.register(unit(1, 2)).unwrap_err(),
            RegistryError::DuplicateUnit(UnitId::new(1))
        );
    }

    #[test]
    fn rejects_gaps_in_page_ids() {
        let mut def = unit(2, 3);
        def.pages[1].id = 5;
        let err = PageRegistry::new().register(def).unwrap_err();
        assert!(matches!(err, RegistryError::NonContiguousPages { position: 1, found: 5, .. }));
    }

    #[test]
    fn rejects_rules_outside_the_unit() {
        let def = unit(3, 4).rule(BranchRule::new(7, BranchCondition::AlternateBranch, 1));
        let err = PageRegistry::new().register(def).unwrap_err();
        assert!(matches!(err, RegistryError::RuleOutsideUnit { rule: 0, page: 7, .. }));
    }

    #[test]
    fn groups_units_by_module() {
        let mut other = unit(5, 1);
        other.module_id = ModuleId::new(2);
        let registry = PageRegistry::new()
            .with_unit(unit(1, 1))
            .and_then(|r| r.with_unit(unit(2, 1)))
            .and_then(|r| r.with_unit(other))
            .unwrap();
        let ids: Vec<UnitId> = registry
            .units_in_module(ModuleId::new(1))
            .map(|u| u.unit_id)
            .collect();
        assert_eq!(ids, vec![UnitId::new(1), UnitId::new(2)]);
        assert_eq!(registry.modules().len(), 2);
    }

    #[test]
    fn loads_catalog_json() {
        let catalog = r#"[
            {
                "module_id": 1,
                "unit_id": 10,
                "title": "Greetings",
                "pages": [
                    { "id": 1, "title": "Intro", "render": "greetings/intro" },
                    { "id": 2, "title": "Game", "render": "greetings/game" },
                    { "id": 3, "title": "Results", "render": "greetings/results" }
                ],
                "rules": [
                    {
                        "page": 1,
                        "condition": { "when": "signal", "name": "skipIntro" },
                        "target": 3,
                        "pace": "feedback"
                    }
                ]
            }
        ]"#;
        let registry = PageRegistry::from_json(catalog).unwrap();
        let unit = registry.unit(UnitId::new(10)).unwrap();
        assert_eq!(unit.total_pages(), 3);
        assert_eq!(unit.rules.len(), 1);
        assert_eq!(unit.pages[1].render.as_str(), "greetings/game");
    }

    #[test]
    fn malformed_catalog_is_reported() {
        let err = PageRegistry::from_json("{ not json").unwrap_err();
        assert!(matches!(err, RegistryError::InvalidCatalog(_)));
    }
}
