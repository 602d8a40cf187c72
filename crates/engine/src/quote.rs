//! Delivery fee quoting.

use common::{AddressId, CustomerId};
use domain::{Address, Money};
use store::{AddressBook, DeliveryFees};

use crate::error::{EngineError, Result};

/// The resolved destination and what it costs to ship there.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryQuote {
    pub address: Address,
    pub fee: Money,
}

/// Resolves the customer's address and quotes its delivery fee.
///
/// A postal code missing from the fee table is undeliverable; there is no
/// zero-fee fallback.
pub async fn quote_delivery<S>(
    store: &S,
    address_id: AddressId,
    customer_id: CustomerId,
) -> Result<DeliveryQuote>
where
    S: AddressBook + DeliveryFees + ?Sized,
{
    let address = store
        .get_address(address_id, customer_id)
        .await?
        .ok_or(EngineError::AddressNotFound(address_id))?;

    let fee = store
        .quote(&address.postal_code)
        .await?
        .ok_or_else(|| EngineError::Undeliverable {
            postal_code: address.postal_code.clone(),
        })?;

    Ok(DeliveryQuote { address, fee })
}
