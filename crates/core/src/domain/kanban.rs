use serde::{Deserialize, Serialize};

use crate::errors::DomainError;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KanbanGroup {
    pub channel_id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KanbanItem {
    pub channel_id: String,
    pub id: i64,
    pub content: String,
    pub group_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KanbanBoard {
    pub channel_id: String,
    pub groups: Vec<KanbanColumn>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct KanbanColumn {
    pub name: String,
    pub items: Vec<KanbanItem>,
}

impl KanbanBoard {
    pub fn assemble(channel_id: &str, groups: Vec<KanbanGroup>, items: Vec<KanbanItem>) -> Self {
        let groups = groups
            .into_iter()
            .map(|group| KanbanColumn {
                items: items.iter().filter(|item| item.group_name == group.name).cloned().collect(),
                name: group.name,
            })
            .collect();
        Self { channel_id: channel_id.to_string(), groups }
    }
}

pub fn parse_item_id(raw: &str) -> Result<i64, DomainError> {
    let trimmed = raw.trim().trim_start_matches('#');
    trimmed
        .parse::<i64>()
        .map_err(|error| DomainError::InvalidId(format!("`{trimmed}`: {error}")))
        .and_then(|id| {
            if id > 0 {
                Ok(id)
            } else {
                Err(DomainError::InvalidId(format!("`{id}`: must be positive")))
            }
        })
}

#[cfg(test)]
mod tests {
    use super::{parse_item_id, KanbanBoard, KanbanGroup, KanbanItem};

    #[test]
    fn item_ids_accept_hash_prefix() {
        assert_eq!(parse_item_id("#12").expect("id"), 12);
        assert_eq!(parse_item_id(" 7 ").expect("id"), 7);
        assert!(parse_item_id("seven").is_err());
        assert!(parse_item_id("0").is_err());
    }

    #[test]
    fn board_groups_items_by_column() {
        let groups = vec![
            KanbanGroup { channel_id: "C".to_owned(), name: "todo".to_owned() },
            KanbanGroup { channel_id: "C".to_owned(), name: "done".to_owned() },
        ];
        let items = vec![KanbanItem {
            channel_id: "C".to_owned(),
            id: 1,
            content: "write tests".to_owned(),
            group_name: "done".to_owned(),
        }];

        let board = KanbanBoard::assemble("C", groups, items);
        assert!(board.groups[0].items.is_empty());
        assert_eq!(board.groups[1].items.len(), 1);
    }
}
