use serde::{Deserialize, Serialize};

use crate::{
    events::EmployeeReclassified,
    models::{ClockDirection, Employee},
};

/// The two lists a site page shows: who can clock in, and who can clock out.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ClockLists {
    pub clock_in: Vec<Employee>,
    pub clock_out: Vec<Employee>,
}

impl ClockLists {
    pub fn new(clock_in: Vec<Employee>, clock_out: Vec<Employee>) -> Self {
        Self {
            clock_in,
            clock_out,
        }
    }

    pub fn list(&self, direction: ClockDirection) -> &[Employee] {
        match direction {
            ClockDirection::In => &self.clock_in,
            ClockDirection::Out => &self.clock_out,
        }
    }

    fn list_mut(&mut self, direction: ClockDirection) -> &mut Vec<Employee> {
        match direction {
            ClockDirection::In => &mut self.clock_in,
            ClockDirection::Out => &mut self.clock_out,
        }
    }

    /// After a clock event in `direction`, the employee leaves that list and
    /// shows up on the other one. Returns false when they were not listed.
    pub fn apply_reclassification(&mut self, event: &EmployeeReclassified) -> bool {
        let from = self.list_mut(event.direction);
        let Some(index) = from
            .iter()
            .position(|employee| employee.employee_id == event.employee_id)
        else {
            log::warn!(
                "Employee {} not on the {} list; nothing to move",
                event.employee_id,
                event.direction.as_str()
            );
            return false;
        };
        let employee = from.remove(index);

        let to = self.list_mut(event.direction.opposite());
        if !to.iter().any(|e| e.employee_id == employee.employee_id) {
            to.push(employee);
        }
        true
    }
}
