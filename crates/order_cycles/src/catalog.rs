//! Reference data owned by other parts of the system.
//!
//! Enterprises, variants, products and fees are only *read* here. The engine
//! never edits them; it needs just enough shape to resolve what an order cycle
//! distributes and to whom.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cyclekit_core::{Entity, EnterpriseFeeId, EnterpriseId, ProductId, VariantId};

/// A producer, hub or shop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enterprise {
    pub id: EnterpriseId,
    pub name: String,
    /// Free-text default collection schedule (e.g. "Every Tuesday 4pm").
    pub next_collection_at: Option<String>,
}

impl Enterprise {
    pub fn new(id: EnterpriseId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            next_collection_at: None,
        }
    }

    pub fn with_next_collection_at(mut self, schedule: impl Into<String>) -> Self {
        self.next_collection_at = Some(schedule.into());
        self
    }
}

impl Entity for Enterprise {
    type Id = EnterpriseId;

    fn id(&self) -> EnterpriseId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variant {
    pub id: VariantId,
    pub product_id: ProductId,
    pub is_master: bool,
    /// Soft-delete marker. Deleted variants stay referenced by old exchanges
    /// but must never be offered.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Variant {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

impl Entity for Variant {
    type Id = VariantId;

    fn id(&self) -> VariantId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub master_id: VariantId,
    /// Non-master variants, in creation order.
    pub variant_ids: Vec<VariantId>,
}

impl Entity for Product {
    type Id = ProductId;

    fn id(&self) -> ProductId {
        self.id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnterpriseFee {
    pub id: EnterpriseFeeId,
    pub enterprise_id: EnterpriseId,
    pub name: String,
}

impl Entity for EnterpriseFee {
    type Id = EnterpriseFeeId;

    fn id(&self) -> EnterpriseFeeId {
        self.id
    }
}

/// The slice of a customer order the engine needs: where it is being
/// collected from and which variants its line items reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub distributor_id: EnterpriseId,
    pub variant_ids: Vec<VariantId>,
}

/// Indexed reference data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    enterprises: BTreeMap<EnterpriseId, Enterprise>,
    variants: BTreeMap<VariantId, Variant>,
    products: BTreeMap<ProductId, Product>,
    fees: BTreeMap<EnterpriseFeeId, EnterpriseFee>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_enterprise(&mut self, enterprise: Enterprise) {
        self.enterprises.insert(enterprise.id, enterprise);
    }

    pub fn insert_fee(&mut self, fee: EnterpriseFee) {
        self.fees.insert(fee.id, fee);
    }

    pub fn remove_fee(&mut self, id: EnterpriseFeeId) -> Option<EnterpriseFee> {
        self.fees.remove(&id)
    }

    /// Load a product record as-is (its variants are loaded separately).
    pub fn upsert_product(&mut self, product: Product) {
        self.products.insert(product.id, product);
    }

    pub fn upsert_variant(&mut self, variant: Variant) {
        self.variants.insert(variant.id, variant);
    }

    /// Register a product together with its master variant.
    pub fn insert_product(&mut self, id: ProductId, name: impl Into<String>) -> VariantId {
        let master_id = VariantId::new();
        self.variants.insert(
            master_id,
            Variant {
                id: master_id,
                product_id: id,
                is_master: true,
                deleted_at: None,
            },
        );
        self.products.insert(
            id,
            Product {
                id,
                name: name.into(),
                master_id,
                variant_ids: Vec::new(),
            },
        );
        master_id
    }

    /// Add a non-master variant to an existing product.
    ///
    /// Returns `None` when the product is unknown.
    pub fn insert_variant(&mut self, product_id: ProductId) -> Option<VariantId> {
        let product = self.products.get_mut(&product_id)?;
        let id = VariantId::new();
        product.variant_ids.push(id);
        self.variants.insert(
            id,
            Variant {
                id,
                product_id,
                is_master: false,
                deleted_at: None,
            },
        );
        Some(id)
    }

    /// Mark a variant soft-deleted. Returns `false` when it is unknown.
    pub fn soft_delete_variant(&mut self, id: VariantId, at: DateTime<Utc>) -> bool {
        match self.variants.get_mut(&id) {
            Some(variant) => {
                variant.deleted_at = Some(at);
                true
            }
            None => false,
        }
    }

    pub fn enterprise(&self, id: EnterpriseId) -> Option<&Enterprise> {
        self.enterprises.get(&id)
    }

    pub fn variant(&self, id: VariantId) -> Option<&Variant> {
        self.variants.get(&id)
    }

    pub fn product(&self, id: ProductId) -> Option<&Product> {
        self.products.get(&id)
    }

    pub fn fee(&self, id: EnterpriseFeeId) -> Option<&EnterpriseFee> {
        self.fees.get(&id)
    }

    /// Variant lookup that hides soft-deleted variants.
    pub fn live_variant(&self, id: VariantId) -> Option<&Variant> {
        self.variant(id).filter(|v| !v.is_deleted())
    }

    /// Non-master, non-deleted variants of a product.
    pub fn live_variants_of<'a>(&'a self, product: &'a Product) -> impl Iterator<Item = &'a Variant> + 'a {
        product
            .variant_ids
            .iter()
            .filter_map(move |id| self.live_variant(*id))
    }

    /// Whether the product has real (non-master) variants defined.
    pub fn has_variants(&self, product: &Product) -> bool {
        self.live_variants_of(product).next().is_some()
    }

    pub fn enterprises(&self) -> impl Iterator<Item = &Enterprise> {
        self.enterprises.values()
    }
}
