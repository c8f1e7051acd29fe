use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Employee {
    pub employee_id: String,
    pub full_name: String,
}

impl Employee {
    pub fn new(employee_id: impl Into<String>, full_name: impl Into<String>) -> Self {
        Self {
            employee_id: employee_id.into(),
            full_name: full_name.into(),
        }
    }
}
