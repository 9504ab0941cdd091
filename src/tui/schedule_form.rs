//! Scheduling form for the terminal user interface.
//!
//! The form mirrors a [`ScheduleDraft`]: every edit is pushed into the draft,
//! and the draft's clamped values are written back into the inputs so what is
//! on screen is what will be submitted.

use crate::{
    fields::DeliverySlot,
    scheduler::ScheduleDraft,
    tui::input::InputField,
};

/// Global order of the form's fields. Day rows follow `FIRST_DAY_ORDER`.
pub const TASK_NAME_ORDER: usize = 0;
pub const PERSON_ORDER: usize = 1;
pub const START_DATE_ORDER: usize = 2;
pub const DAYS_ORDER: usize = 3;
pub const SLOT_ORDER: usize = 4;
pub const FIRST_DAY_ORDER: usize = 5;

/// Minutes moved by one Left/Right press on a day row.
pub const SLIDER_STEP: i64 = 15;

/// Slot choices in selector order; `None` is "not chosen".
pub const SLOT_CHOICES: [Option<DeliverySlot>; 4] = [
    None,
    Some(DeliverySlot::OnePm),
    Some(DeliverySlot::FourPm),
    Some(DeliverySlot::SevenPm),
];

pub struct ScheduleForm {
    pub delivery_code: String,
    pub draft: ScheduleDraft,
    pub task_name: InputField,
    pub person: InputField,
    pub start_date: InputField,
    pub days: InputField,
    pub day_inputs: Vec<InputField>,
    pub slot: usize,
    pub current_field: usize,
    /// Last validation or submission problem, shown under the form.
    pub error: Option<String>,
    /// A submission is outstanding.
    pub submitting: bool,
    /// History has been applied.
    pub history_loaded: bool,
}

impl ScheduleForm {
    pub fn new(delivery_code: &str, draft: ScheduleDraft) -> Self {
        let slot = SLOT_CHOICES.iter().position(|s| *s == draft.slot).unwrap_or(0);
        let mut form = ScheduleForm {
            delivery_code: delivery_code.to_string(),
            task_name: InputField::with_value(&draft.task_name),
            person: InputField::with_value(&draft.responsible),
            start_date: InputField::new(),
            days: InputField::new(),
            day_inputs: Vec::new(),
            slot,
            current_field: TASK_NAME_ORDER,
            error: None,
            submitting: false,
            history_loaded: false,
            draft,
        };
        form.sync_from_draft();
        form.update_active_field();
        form
    }

    pub fn key(&self) -> &str {
        self.draft.key()
    }

    /// Refresh date, day count and per-day inputs from the draft.
    pub fn sync_from_draft(&mut self) {
        self.start_date
            .set(&self.draft.start_date().map(|d| d.to_string()).unwrap_or_default());
        self.days.set(&self.draft.days().to_string());
        self.day_inputs = self
            .draft
            .durations()
            .iter()
            .map(|m| InputField::with_value(&m.to_string()))
            .collect();
        self.current_field = self.current_field.min(self.field_count() - 1);
    }

    /// Refresh the day rows in place, e.g. after the ceilings moved.
    fn sync_day_inputs(&mut self) {
        for (input, minutes) in self.day_inputs.iter_mut().zip(self.draft.durations()) {
            input.set(&minutes.to_string());
        }
    }

    pub fn field_count(&self) -> usize {
        FIRST_DAY_ORDER + self.day_inputs.len()
    }

    /// Day index of the current field, when it is a day row.
    pub fn current_day(&self) -> Option<usize> {
        self.current_field.checked_sub(FIRST_DAY_ORDER)
    }

    fn current_input(&mut self) -> Option<&mut InputField> {
        match self.current_field {
            TASK_NAME_ORDER => Some(&mut self.task_name),
            PERSON_ORDER => Some(&mut self.person),
            START_DATE_ORDER => Some(&mut self.start_date),
            DAYS_ORDER => Some(&mut self.days),
            SLOT_ORDER => None,
            n => self.day_inputs.get_mut(n - FIRST_DAY_ORDER),
        }
    }

    pub fn next_field(&mut self) {
        self.commit_current();
        self.current_field = (self.current_field + 1) % self.field_count();
        self.update_active_field();
    }

    pub fn prev_field(&mut self) {
        self.commit_current();
        self.current_field = if self.current_field == 0 {
            self.field_count() - 1
        } else {
            self.current_field - 1
        };
        self.update_active_field();
    }

    pub fn update_active_field(&mut self) {
        self.task_name.active = false;
        self.person.active = false;
        self.start_date.active = false;
        self.days.active = false;
        for input in &mut self.day_inputs {
            input.active = false;
        }
        if let Some(input) = self.current_input() {
            input.active = true;
        }
    }

    /// Push the current field's text into the draft and show what was kept.
    pub fn commit_current(&mut self) {
        match self.current_field {
            START_DATE_ORDER => {
                let text = self.start_date.value.clone();
                if text.trim().is_empty() {
                    return;
                }
                match self.draft.set_start_date(&text) {
                    Ok(_) => {
                        self.error = None;
                        self.sync_day_inputs();
                    }
                    Err(e) => {
                        self.error = Some(e.to_string());
                        let kept = self.draft.start_date().map(|d| d.to_string()).unwrap_or_default();
                        self.start_date.set(&kept);
                    }
                }
            }
            SLOT_ORDER | TASK_NAME_ORDER | PERSON_ORDER | DAYS_ORDER => {}
            _ => {
                if let Some(index) = self.current_day() {
                    let text = self.day_inputs[index].value.clone();
                    if let Ok(stored) = self.draft.enter_day_duration(index, &text) {
                        self.day_inputs[index].set(&stored.to_string());
                    }
                }
            }
        }
    }

    /// Typed input. Text fields feed the draft as they change; day rows accept digits only.
    pub fn handle_char(&mut self, c: char) {
        if self.current_day().is_some() && !c.is_ascii_digit() {
            return;
        }
        if self.current_field == DAYS_ORDER && !c.is_ascii_digit() {
            return;
        }
        if let Some(input) = self.current_input() {
            input.handle_char(c);
        }
        self.after_edit();
    }

    pub fn handle_backspace(&mut self) {
        if let Some(input) = self.current_input() {
            input.handle_backspace();
        }
        self.after_edit();
    }

    fn after_edit(&mut self) {
        match self.current_field {
            TASK_NAME_ORDER => self.draft.set_task_name(&self.task_name.value),
            PERSON_ORDER => {
                self.draft.set_responsible_person(&self.person.value);
                self.sync_day_inputs();
            }
            DAYS_ORDER => {
                let days = self.draft.set_number_of_days(&self.days.value);
                let text = self.days.value.clone();
                self.sync_from_draft();
                // Keep an empty box while the user is retyping the count.
                if days == 0 && text.is_empty() {
                    self.days.clear();
                }
                self.days.active = true;
            }
            _ => {}
        }
    }

    /// Left/Right: moves the cursor in text fields, cycles the slot, or slides a day's minutes.
    pub fn handle_left_right(&mut self, right: bool) {
        if self.current_field == SLOT_ORDER {
            let n = SLOT_CHOICES.len();
            self.slot = if right { (self.slot + 1) % n } else { (self.slot + n - 1) % n };
            self.draft.set_delivery_slot(SLOT_CHOICES[self.slot]);
            return;
        }
        if let Some(index) = self.current_day() {
            if self.draft.durations().get(index).map(u32::to_string).as_ref() != Some(&self.day_inputs[index].value) {
                self.commit_current();
            }
            let delta = if right { SLIDER_STEP } else { -SLIDER_STEP };
            if let Ok(stored) = self.draft.nudge_day_duration(index, delta) {
                self.day_inputs[index].set(&stored.to_string());
            }
            return;
        }
        if let Some(input) = self.current_input() {
            if right {
                input.move_cursor_right();
            } else {
                input.move_cursor_left();
            }
        }
    }

    /// Apply pending text and check required fields. Returns the draft to submit.
    pub fn prepare_submit(&mut self) -> Result<ScheduleDraft, String> {
        self.commit_current();
        match self.draft.validate() {
            Ok(()) => {
                self.error = None;
                Ok(self.draft.clone())
            }
            Err(e) => {
                self.error = Some(e.to_string());
                Err(e.to_string())
            }
        }
    }

    pub fn slot_label(&self) -> &'static str {
        SLOT_CHOICES[self.slot].map(DeliverySlot::label).unwrap_or("(select)")
    }
}
