//! Claims path pointer evaluation, OpenID4VP 1.0 §7.

use serde::Serialize;
use serde_json::Value as Json;

use crate::core::dcql_query::{
    DcqlCredentialClaimsQuery, DcqlCredentialClaimsQueryPath, DcqlCredentialQuery,
};

/// A claim filter satisfied by a held credential.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatchedClaim {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub path: Vec<DcqlCredentialClaimsQueryPath>,
    /// Every selected value that passed the value filter.
    pub values: Vec<Json>,
}

/// Select the elements of `root` a claims path pointer points to.
///
/// An empty result means the claim is absent. A key applied to a non-object or an index
/// applied to a non-array selects nothing.
pub fn select<'a>(root: &'a Json, path: &[DcqlCredentialClaimsQueryPath]) -> Vec<&'a Json> {
    let mut selected = vec![root];
    for component in path {
        selected = selected
            .into_iter()
            .flat_map(|node| -> Vec<&'a Json> {
                match (component, node) {
                    (DcqlCredentialClaimsQueryPath::String(key), Json::Object(map)) => {
                        map.get(key).into_iter().collect()
                    }
                    (DcqlCredentialClaimsQueryPath::Integer(i), Json::Array(items)) => {
                        items.get(*i).into_iter().collect()
                    }
                    (DcqlCredentialClaimsQueryPath::Null, Json::Array(items)) => {
                        items.iter().collect()
                    }
                    _ => Vec::new(),
                }
            })
            .collect();
        if selected.is_empty() {
            break;
        }
    }
    selected
}

fn match_claim(claim: &DcqlCredentialClaimsQuery, claims: &Json) -> Option<MatchedClaim> {
    let values: Vec<Json> = select(claims, claim.path())
        .into_iter()
        .filter(|value| claim.accepts_value(value))
        .cloned()
        .collect();
    if values.is_empty() {
        return None;
    }
    Some(MatchedClaim {
        id: claim.id().cloned(),
        path: claim.path().to_vec(),
        values,
    })
}

/// The claims of `query` that `claims` satisfies, or `None` when it does not satisfy the
/// query.
///
/// Without `claim_sets` every claim filter must match. With them, the first claim set whose
/// claims all match is used.
pub fn match_claims(query: &DcqlCredentialQuery, claims: &Json) -> Option<Vec<MatchedClaim>> {
    let Some(filters) = query.claims() else {
        return Some(Vec::new());
    };

    let Some(claim_sets) = query.claim_sets() else {
        return filters
            .iter()
            .map(|filter| match_claim(filter, claims))
            .collect();
    };

    claim_sets.iter().find_map(|claim_set| {
        claim_set
            .iter()
            .map(|id| {
                filters
                    .iter()
                    .find(|filter| filter.id() == Some(id))
                    .and_then(|filter| match_claim(filter, claims))
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(value: Json) -> Vec<DcqlCredentialClaimsQueryPath> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn select_paths() {
        let claims = json!({
            "name": "Arthur Dent",
            "nationalities": ["British", "Betelgeusian"],
            "degrees": [{ "type": "BSc" }, { "type": "MSc" }]
        });

        assert_eq!(select(&claims, &path(json!(["name"]))), vec!["Arthur Dent"]);
        assert_eq!(
            select(&claims, &path(json!(["nationalities", 1]))),
            vec!["Betelgeusian"]
        );
        assert_eq!(
            select(&claims, &path(json!(["degrees", null, "type"]))),
            vec!["BSc", "MSc"]
        );
        assert!(select(&claims, &path(json!(["name", 0]))).is_empty());
        assert!(select(&claims, &path(json!(["missing", "x"]))).is_empty());
    }

    #[test]
    fn claim_sets_pick_first_satisfied() {
        let query: DcqlCredentialQuery = serde_json::from_value(json!({
            "id": "pid",
            "format": "dc+sd-jwt",
            "claims": [
                { "id": "a", "path": ["last_name"] },
                { "id": "b", "path": ["postal_code"] },
                { "id": "c", "path": ["locality"] }
            ],
            "claim_sets": [["a", "b"], ["a", "c"]]
        }))
        .unwrap();

        let matched = match_claims(&query, &json!({"last_name": "Doe", "locality": "Berlin"}))
            .unwrap();
        let ids: Vec<_> = matched.iter().filter_map(|c| c.id.as_deref()).collect();
        assert_eq!(ids, vec!["a", "c"]);

        assert!(match_claims(&query, &json!({"last_name": "Doe"})).is_none());
    }

    #[test]
    fn value_filters() {
        let query: DcqlCredentialQuery = serde_json::from_value(json!({
            "id": "mdl",
            "format": "mso_mdoc",
            "claims": [
                { "path": ["org.iso.18013.5.1", "age_over_21"], "values": [true] }
            ]
        }))
        .unwrap();

        let over = json!({"org.iso.18013.5.1": {"age_over_21": true}});
        let under = json!({"org.iso.18013.5.1": {"age_over_21": false}});

        assert_eq!(match_claims(&query, &over).unwrap()[0].values, vec![json!(true)]);
        assert!(match_claims(&query, &under).is_none());
    }
}
