//! Read model combining a contact with its validation signals.

use crate::model::contact::{AddressType, Contact};
use crate::model::validation::{AddressValidationResult, NcoaMove};
use std::collections::BTreeMap;

/// Everything the scoring engine needs to judge one contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactProfile {
    pub contact: Contact,
    pub validations: BTreeMap<AddressType, AddressValidationResult>,
    pub moves: Vec<NcoaMove>,
}

impl ContactProfile {
    /// Profile without any validation signal attached.
    pub fn unvalidated(contact: Contact) -> Self {
        Self {
            contact,
            validations: BTreeMap::new(),
            moves: Vec::new(),
        }
    }

    pub fn validation(&self, address_type: AddressType) -> Option<&AddressValidationResult> {
        self.validations.get(&address_type)
    }

    pub fn moves_for(&self, address_type: AddressType) -> impl Iterator<Item = &NcoaMove> {
        self.moves
            .iter()
            .filter(move |record| record.address_type == address_type)
    }
}
