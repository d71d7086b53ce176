use crate::{CoreError, Rejection};
use siren_schema::{InventoryItem, ItemKey};

/// Take one of each of two items, or neither.
pub fn try_consume_pair(a: &mut InventoryItem, b: &mut InventoryItem) -> bool {
    if a.qty == 0 || b.qty == 0 {
        return false;
    }
    a.qty -= 1;
    b.qty -= 1;
    true
}

/// Take one of every item, or none. On stockout returns the keys at zero.
///
/// The stock two-item restock set goes through [`try_consume_pair`].
pub fn try_consume(items: &mut [InventoryItem]) -> Result<(), Vec<ItemKey>> {
    let taken = if let [a, b] = &mut *items {
        try_consume_pair(a, b)
    } else if items.iter().all(|item| item.qty > 0) {
        for item in items.iter_mut() {
            item.qty -= 1;
        }
        true
    } else {
        false
    };
    if taken {
        return Ok(());
    }
    Err(items
        .iter()
        .filter(|item| item.qty == 0)
        .map(|item| item.key.clone())
        .collect())
}

/// Signed stock correction. Results below zero are refused, not clamped.
pub fn adjust(item: &mut InventoryItem, delta: i64) -> Result<(), CoreError> {
    let next = i64::from(item.qty).checked_add(delta).ok_or_else(|| {
        CoreError::InvalidArgument(format!("adjusting '{}' by {delta} overflows", item.key))
    })?;
    if next < 0 {
        return Err(Rejection::WouldGoNegative {
            key: item.key.clone(),
            qty: item.qty,
            delta,
        }
        .into());
    }
    item.qty = u32::try_from(next).map_err(|_| {
        CoreError::InvalidArgument(format!(
            "adjusting '{}' by {delta} exceeds the maximum stock",
            item.key
        ))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;

    fn item(key: &str, qty: u32) -> InventoryItem {
        InventoryItem::new(key.into(), key, qty, 0)
    }

    #[test]
    fn pair_decrements_both_or_neither() {
        let mut a = item("bandages", 1);
        let mut b = item("oxygen", 0);
        assert!(!try_consume_pair(&mut a, &mut b));
        assert_eq!((a.qty, b.qty), (1, 0));

        b.qty = 2;
        assert!(try_consume_pair(&mut a, &mut b));
        assert_eq!((a.qty, b.qty), (0, 1));
        assert!(!try_consume_pair(&mut a, &mut b));
        assert_eq!((a.qty, b.qty), (0, 1));
    }

    #[test]
    fn consume_reports_every_empty_item() {
        let mut items = vec![item("bandages", 0), item("oxygen", 4), item("saline", 0)];
        let missing = try_consume(&mut items).unwrap_err();
        assert_eq!(missing, vec![ItemKey::from("bandages"), ItemKey::from("saline")]);
        assert_eq!(items[1].qty, 4);
    }

    #[test]
    fn consume_takes_one_of_each() {
        let mut items = vec![item("bandages", 50), item("oxygen", 20)];
        try_consume(&mut items).unwrap();
        assert_eq!((items[0].qty, items[1].qty), (49, 19));
    }

    #[test]
    fn two_item_set_is_all_or_nothing() {
        let mut items = vec![item("bandages", 0), item("oxygen", 5)];
        let missing = try_consume(&mut items).unwrap_err();
        assert_eq!(missing, vec![ItemKey::from("bandages")]);
        assert_eq!((items[0].qty, items[1].qty), (0, 5));
    }

    #[test]
    fn adjust_adds_and_subtracts() {
        let mut it = item("oxygen", 5);
        adjust(&mut it, 10).unwrap();
        assert_eq!(it.qty, 15);
        adjust(&mut it, -15).unwrap();
        assert_eq!(it.qty, 0);
    }

    #[test]
    fn adjust_refuses_negative_result() {
        let mut it = item("oxygen", 2);
        let err = adjust(&mut it, -3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RejectedTransition);
        assert!(err.to_string().contains("would go negative"));
        assert_eq!(it.qty, 2);
    }

    #[test]
    fn adjust_overflow_is_invalid_argument() {
        let mut it = item("oxygen", 1);
        assert_eq!(
            adjust(&mut it, i64::MAX).unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        let mut it = item("oxygen", u32::MAX);
        assert_eq!(adjust(&mut it, 1).unwrap_err().kind(), ErrorKind::InvalidArgument);
        assert_eq!(it.qty, u32::MAX);
    }
}
