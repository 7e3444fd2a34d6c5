use std::collections::HashMap;

use crate::model::*;

/// Attach to each request the items created in answer to it.
///
/// Request order is preserved; items within a request are ordered by id.
/// Items with no (or an unlisted) request id are dropped.
pub fn aggregate(requests: Vec<ItemRequest>, mut items: Vec<Item>) -> Vec<RequestView> {
    items.sort_by_key(|i| i.id);
    let mut by_request: HashMap<RequestId, Vec<Item>> = HashMap::new();
    for item in items {
        if let Some(rid) = item.request_id {
            by_request.entry(rid).or_default().push(item);
        }
    }
    requests
        .into_iter()
        .map(|request| {
            let items = by_request.remove(&request.id).unwrap_or_default();
            RequestView { request, items }
        })
        .collect()
}
