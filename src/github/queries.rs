//! GraphQL documents sent to the GitHub API.

/// Page through a Projects (v2) board. `$fieldName` selects the status
/// single-select field whose option id is compared against the board ids.
pub const PROJECT_ITEMS: &str = r#"
query($projectId: ID!, $fieldName: String!, $cursor: String) {
  node(id: $projectId) {
    ... on ProjectV2 {
      items(first: 100, after: $cursor) {
        pageInfo { hasNextPage endCursor }
        nodes {
          id
          fieldValueByName(name: $fieldName) {
            ... on ProjectV2ItemFieldSingleSelectValue { optionId name }
          }
          content {
            ... on Issue {
              number
              title
              labels(first: 20) { nodes { name } }
            }
          }
        }
      }
    }
  }
}
"#;

/// Resolve the id of the board's status field by name.
pub const STATUS_FIELD: &str = r#"
query($projectId: ID!, $fieldName: String!) {
  node(id: $projectId) {
    ... on ProjectV2 {
      field(name: $fieldName) {
        ... on ProjectV2SingleSelectField { id name }
      }
    }
  }
}
"#;

/// Set a single-select field value on one board item.
pub const UPDATE_ITEM_FIELD: &str = r#"
mutation($projectId: ID!, $itemId: ID!, $fieldId: ID!, $optionId: String!) {
  updateProjectV2ItemFieldValue(
    input: {
      projectId: $projectId
      itemId: $itemId
      fieldId: $fieldId
      value: { singleSelectOptionId: $optionId }
    }
  ) {
    projectV2Item { id }
  }
}
"#;

pub const VIEWER: &str = r#"
query {
  viewer { login }
}
"#;
