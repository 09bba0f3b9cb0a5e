use std::sync::Arc;

use chrono::{Local, NaiveDateTime, Timelike};

use crate::error::{RequiredField, StorageError, ValidationError, WorkflowError};
use crate::events::{CoreEvent, EventSink};
use crate::store::models::{DATE_FORMAT, TIME_FORMAT};
use crate::store::{SaveOutcome, Ticket, TicketStore};
use crate::weighbridge::{WeighbridgeStatus, WeightSource};
use crate::{log_debug, log_info, log_warn};

use super::{FormDefaults, FormSnapshot, ImageName, ImageSide, TicketState};

const ENABLE_LOGS: bool = true;

const IMAGE_STAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Drives one operator form through the two-weighment lifecycle.
///
/// The working ticket is a transient copy; the store is re-read whenever a
/// ticket number is entered and before every capture, so a ticket left
/// pending by an earlier run (or saved behind this form's back) resumes
/// from what is on disk.
pub struct WeighmentWorkflow {
    store: Arc<TicketStore>,
    scale: Arc<dyn WeightSource>,
    sink: Arc<dyn EventSink>,
    defaults: FormDefaults,
    working: Ticket,
    state: TicketState,
}

impl WeighmentWorkflow {
    pub fn new(
        store: Arc<TicketStore>,
        scale: Arc<dyn WeightSource>,
        sink: Arc<dyn EventSink>,
        defaults: FormDefaults,
    ) -> Self {
        let working = defaults.blank_ticket("");
        Self {
            store,
            scale,
            sink,
            defaults,
            working,
            state: TicketState::New,
        }
    }

    pub fn ticket(&self) -> &Ticket {
        &self.working
    }

    pub fn state(&self) -> TicketState {
        self.state
    }

    pub fn defaults(&self) -> &FormDefaults {
        &self.defaults
    }

    pub fn can_capture_first(&self) -> bool {
        self.state.can_capture_first()
    }

    pub fn can_capture_second(&self) -> bool {
        self.state.can_capture_second()
    }

    fn reject<T>(&self, err: impl Into<WorkflowError>) -> Result<T, WorkflowError> {
        let err = err.into();
        log_debug!(
            "rejected action on ticket {:?} ({:?}): {err}",
            self.working.ticket_no,
            self.state
        );
        Err(err)
    }

    fn announce_state(&self) {
        self.sink.emit(CoreEvent::TicketStateChanged {
            ticket_no: self.working.ticket_no.clone(),
            state: self.state,
        });
    }

    fn load(&mut self, ticket: Ticket) {
        self.state = ticket.state();
        self.working = ticket;
        self.announce_state();
    }

    /// Looks the ticket up and loads it into the form. An unknown number
    /// starts a new ticket, keeping whatever the operator already typed.
    pub fn enter_ticket(&mut self, ticket_no: &str) -> Result<TicketState, WorkflowError> {
        let ticket_no = ticket_no.trim();
        if ticket_no.is_empty() {
            return self.reject(ValidationError::MissingFields(vec![RequiredField::TicketNo]));
        }

        match self.store.find_by_ticket(ticket_no)? {
            Some(stored) => {
                log_debug!("loaded ticket {ticket_no} in state {:?}", stored.state());
                self.load(stored);
            }
            None => {
                if self.state != TicketState::New {
                    self.working = self.defaults.blank_ticket(ticket_no);
                } else {
                    self.working.ticket_no = ticket_no.to_string();
                }
                self.state = TicketState::New;
                self.announce_state();
            }
        }
        Ok(self.state)
    }

    /// Issues the next free ticket number and enters it.
    pub fn next_ticket_no(&mut self) -> Result<String, WorkflowError> {
        let next = self.store.next_ticket_no(&self.defaults.ticket_prefix)?;
        self.enter_ticket(&next)?;
        Ok(next)
    }

    pub fn update_form(&mut self, snapshot: &FormSnapshot) -> Result<(), ValidationError> {
        if self.state.is_read_only() {
            let err = ValidationError::TicketCompleted(self.working.ticket_no.clone());
            log_debug!("rejected form edit: {err}");
            return Err(err);
        }
        snapshot.apply_to(&mut self.working);
        Ok(())
    }

    /// Resets the form to the station defaults.
    pub fn clear(&mut self) {
        self.working = self.defaults.blank_ticket("");
        self.state = TicketState::New;
        self.announce_state();
    }

    pub fn missing_fields(&self) -> Vec<RequiredField> {
        let ticket = &self.working;
        [
            (RequiredField::TicketNo, &ticket.ticket_no),
            (RequiredField::VehicleNo, &ticket.vehicle_no),
            (RequiredField::AgencyName, &ticket.agency_name),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| field)
        .collect()
    }

    fn require_fields(&self) -> Result<(), ValidationError> {
        let missing = self.missing_fields();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::MissingFields(missing))
        }
    }

    fn live_weight(&self) -> Result<f64, ValidationError> {
        match self.scale.weight_status() {
            WeighbridgeStatus::Reading { weight } => Ok(weight),
            WeighbridgeStatus::AwaitingReading => Err(ValidationError::NoWeightReading),
            WeighbridgeStatus::Disconnected => Err(ValidationError::WeighbridgeNotConnected),
        }
    }

    fn persist(
        &mut self,
        candidate: Ticket,
        next_state: TicketState,
    ) -> Result<SaveOutcome, WorkflowError> {
        match self.store.save(&candidate) {
            Ok(outcome) => {
                self.working = candidate;
                self.sink.emit(CoreEvent::SaveResult {
                    success: true,
                    ticket: self.working.clone(),
                });
                if self.state != next_state {
                    self.state = next_state;
                    self.announce_state();
                }
                Ok(outcome)
            }
            Err(err) => {
                log_warn!("saving ticket {} failed: {err}", candidate.ticket_no);
                self.sink.emit(CoreEvent::SaveResult {
                    success: false,
                    ticket: candidate,
                });
                Err(err.into())
            }
        }
    }

    fn check_capture(&self) -> Result<f64, ValidationError> {
        self.require_fields()?;
        self.live_weight()
    }

    /// Records the live weight as the first weighment and inserts the ticket.
    pub fn capture_first_weight(&mut self) -> Result<Ticket, WorkflowError> {
        match self.state {
            TicketState::New => {}
            TicketState::FirstPending => {
                let ticket_no = self.working.ticket_no.clone();
                return self.reject(ValidationError::FirstWeightAlreadyCaptured(ticket_no));
            }
            TicketState::Completed => {
                let err = ValidationError::TicketCompleted(self.working.ticket_no.clone());
                return self.reject(err);
            }
        }
        let weight = match self.check_capture() {
            Ok(weight) => weight,
            Err(err) => return self.reject(err),
        };

        // Another save may have landed since the number was entered.
        if let Some(stored) = self.store.find_by_ticket(&self.working.ticket_no)? {
            if stored.first_weight.is_some() {
                let ticket_no = stored.ticket_no.clone();
                self.load(stored);
                return self.reject(ValidationError::FirstWeightAlreadyCaptured(ticket_no));
            }
        }

        let now = capture_time();
        let mut candidate = self.working.clone();
        candidate.ticket_no = candidate.ticket_no.trim().to_string();
        if candidate.date.is_empty() {
            candidate.date = now.format(DATE_FORMAT).to_string();
            candidate.time = now.format(TIME_FORMAT).to_string();
        }
        candidate.first_weight = Some(weight);
        candidate.first_timestamp = Some(now);

        self.persist(candidate, TicketState::FirstPending)?;
        log_info!(
            "first weighment {weight} recorded for ticket {}",
            self.working.ticket_no
        );
        Ok(self.working.clone())
    }

    /// Records the live weight as the second weighment and completes the
    /// ticket.
    pub fn capture_second_weight(&mut self) -> Result<Ticket, WorkflowError> {
        match self.state {
            TicketState::FirstPending => {}
            TicketState::New => {
                let err = ValidationError::FirstWeightMissing(self.working.ticket_no.clone());
                return self.reject(err);
            }
            TicketState::Completed => {
                let err = ValidationError::TicketCompleted(self.working.ticket_no.clone());
                return self.reject(err);
            }
        }
        let weight = match self.check_capture() {
            Ok(weight) => weight,
            Err(err) => return self.reject(err),
        };

        let stored = match self.store.find_by_ticket(&self.working.ticket_no)? {
            Some(stored) => stored,
            None => {
                let ticket_no = self.working.ticket_no.clone();
                self.clear_weights();
                return self.reject(ValidationError::FirstWeightMissing(ticket_no));
            }
        };
        if stored.state() == TicketState::Completed {
            let ticket_no = stored.ticket_no.clone();
            self.load(stored);
            return self.reject(ValidationError::TicketCompleted(ticket_no));
        }

        let mut candidate = self.working.clone();
        if candidate.first_weight.is_none() {
            candidate.first_weight = stored.first_weight;
            candidate.first_timestamp = stored.first_timestamp;
        }
        candidate.second_weight = Some(weight);
        candidate.second_timestamp = Some(capture_time());

        self.persist(candidate, TicketState::Completed)?;
        log_info!(
            "second weighment {weight} recorded for ticket {}; net {:?}",
            self.working.ticket_no,
            self.working.net_weight()
        );
        Ok(self.working.clone())
    }

    fn clear_weights(&mut self) {
        self.working.first_weight = None;
        self.working.first_timestamp = None;
        self.working.second_weight = None;
        self.working.second_timestamp = None;
        self.state = TicketState::New;
        self.announce_state();
    }

    /// Persists descriptive edits made to a pending ticket.
    pub fn save_form(&mut self) -> Result<Ticket, WorkflowError> {
        match self.state {
            TicketState::FirstPending => {}
            TicketState::New => {
                let err = ValidationError::FirstWeightMissing(self.working.ticket_no.clone());
                return self.reject(err);
            }
            TicketState::Completed => {
                let err = ValidationError::TicketCompleted(self.working.ticket_no.clone());
                return self.reject(err);
            }
        }
        if let Err(err) = self.require_fields() {
            return self.reject(err);
        }

        let candidate = self.working.clone();
        self.persist(candidate, TicketState::FirstPending)?;
        Ok(self.working.clone())
    }

    /// File name and watermark for an image of the current vehicle.
    pub fn image_name(&self, side: ImageSide) -> Result<ImageName, ValidationError> {
        self.image_name_at(side, capture_time())
    }

    pub fn image_name_at(
        &self,
        side: ImageSide,
        at: NaiveDateTime,
    ) -> Result<ImageName, ValidationError> {
        let vehicle = self.working.vehicle_no.trim();
        if vehicle.is_empty() {
            return Err(ValidationError::VehicleRequiredForImage);
        }
        let site = self.working.site_name.trim().replace(' ', "_");
        let vehicle = vehicle.replace(' ', "_");
        let stamp = at.format(IMAGE_STAMP_FORMAT);

        Ok(ImageName {
            file_name: format!("{site}_{vehicle}_{stamp}_{}.jpg", side.suffix()),
            watermark: format!("{site} - {vehicle} - {stamp}"),
        })
    }

    /// Records an image file name on the ticket, saving it right away when
    /// the ticket is already on file.
    pub fn attach_image(&mut self, side: ImageSide, file_name: &str) -> Result<(), WorkflowError> {
        if self.state.is_read_only() {
            return self.reject(ValidationError::TicketCompleted(self.working.ticket_no.clone()));
        }
        if self.working.vehicle_no.trim().is_empty() {
            return self.reject(ValidationError::VehicleRequiredForImage);
        }

        let mut candidate = self.working.clone();
        let slot = match side {
            ImageSide::Front => &mut candidate.front_image,
            ImageSide::Back => &mut candidate.back_image,
        };
        *slot = Some(file_name.trim().to_string());

        match self.state {
            TicketState::New => {
                self.working = candidate;
                Ok(())
            }
            state => self.persist(candidate, state).map(|_| ()),
        }
    }

    pub fn find_vehicle(&self, vehicle_no: &str) -> Result<Option<Ticket>, StorageError> {
        self.store.find_by_vehicle(vehicle_no)
    }

    pub fn pending(&self) -> Result<Vec<Ticket>, StorageError> {
        self.store.pending()
    }

    pub fn search(&self, needle: &str) -> Result<Vec<Ticket>, StorageError> {
        self.store.filter(needle)
    }
}

/// Wall-clock time at the record file's one-second resolution.
fn capture_time() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CoreEvent;
    use crate::workflow::FormField;
    use chrono::NaiveDate;
    use std::sync::Mutex;

    struct FakeScale(Mutex<WeighbridgeStatus>);

    impl FakeScale {
        fn reading(weight: f64) -> Arc<Self> {
            Arc::new(Self(Mutex::new(WeighbridgeStatus::Reading { weight })))
        }

        fn set(&self, status: WeighbridgeStatus) {
            *self.0.lock().unwrap() = status;
        }
    }

    impl WeightSource for FakeScale {
        fn weight_status(&self) -> WeighbridgeStatus {
            *self.0.lock().unwrap()
        }
    }

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<CoreEvent>>);

    impl EventSink for RecordingSink {
        fn emit(&self, event: CoreEvent) {
            self.0.lock().unwrap().push(event);
        }
    }

    impl RecordingSink {
        fn names(&self) -> Vec<&'static str> {
            self.0.lock().unwrap().iter().map(CoreEvent::name).collect()
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<TicketStore>,
        scale: Arc<FakeScale>,
        sink: Arc<RecordingSink>,
        workflow: WeighmentWorkflow,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let (store, _) = TicketStore::open(dir.path().join("tharuni_data.csv")).unwrap();
        let store = Arc::new(store);
        let scale = FakeScale::reading(18000.0);
        let sink = Arc::new(RecordingSink::default());
        let workflow = WeighmentWorkflow::new(
            Arc::clone(&store),
            scale.clone(),
            sink.clone(),
            FormDefaults::default(),
        );
        Fixture {
            _dir: dir,
            store,
            scale,
            sink,
            workflow,
        }
    }

    fn fill(workflow: &mut WeighmentWorkflow) {
        let snapshot = FormSnapshot::default()
            .with(FormField::VehicleNo, "AP07 TX 4431")
            .with(FormField::AgencyName, "Sri Balaji");
        workflow.update_form(&snapshot).unwrap();
    }

    #[test]
    fn first_capture_requires_fields_and_names_them() {
        let mut fx = fixture();
        fx.workflow.enter_ticket("T0001").unwrap();

        let err = fx.workflow.capture_first_weight().unwrap_err();
        assert_eq!(
            err.to_string(),
            "missing required fields: Vehicle No, Agency Name"
        );
        assert_eq!(fx.workflow.state(), TicketState::New);
        assert!(fx.store.all().unwrap().is_empty());
    }

    #[test]
    fn capture_without_weighbridge_is_rejected_without_writing() {
        let mut fx = fixture();
        fx.workflow.enter_ticket("T0001").unwrap();
        fill(&mut fx.workflow);

        fx.scale.set(WeighbridgeStatus::Disconnected);
        let err = fx.workflow.capture_first_weight().unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Validation(ValidationError::WeighbridgeNotConnected)
        ));

        fx.scale.set(WeighbridgeStatus::AwaitingReading);
        let err = fx.workflow.capture_first_weight().unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Validation(ValidationError::NoWeightReading)
        ));

        assert_eq!(fx.workflow.state(), TicketState::New);
        assert!(fx.store.all().unwrap().is_empty());
    }

    #[test]
    fn two_weighments_complete_the_ticket() {
        let mut fx = fixture();
        fx.workflow.enter_ticket("T0001").unwrap();
        fill(&mut fx.workflow);

        let first = fx.workflow.capture_first_weight().unwrap();
        assert_eq!(first.first_weight, Some(18000.0));
        assert!(!first.date.is_empty());
        assert_eq!(fx.workflow.state(), TicketState::FirstPending);
        assert!(fx.workflow.can_capture_second());

        fx.scale.set(WeighbridgeStatus::Reading { weight: 12000.0 });
        let done = fx.workflow.capture_second_weight().unwrap();
        assert_eq!(done.net_weight(), Some(6000.0));
        assert_eq!(fx.workflow.state(), TicketState::Completed);

        let all = fx.store.all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0], done);
        assert!(fx.sink.names().contains(&"save-result"));
    }

    #[test]
    fn second_capture_needs_a_first() {
        let mut fx = fixture();
        fx.workflow.enter_ticket("T0001").unwrap();
        fill(&mut fx.workflow);
        let err = fx.workflow.capture_second_weight().unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Validation(ValidationError::FirstWeightMissing(_))
        ));
    }

    #[test]
    fn stale_form_does_not_insert_twice() {
        let mut fx = fixture();
        fx.workflow.enter_ticket("T0001").unwrap();
        fill(&mut fx.workflow);

        // Another station process records the first weighment meanwhile.
        let elsewhere = Ticket {
            first_weight: Some(17500.0),
            vehicle_no: "AP07 TX 4431".into(),
            agency_name: "Sri Balaji".into(),
            ..Ticket::new("T0001")
        };
        fx.store.save(&elsewhere).unwrap();

        let err = fx.workflow.capture_first_weight().unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Validation(ValidationError::FirstWeightAlreadyCaptured(_))
        ));
        assert_eq!(fx.workflow.state(), TicketState::FirstPending);
        assert_eq!(fx.workflow.ticket().first_weight, Some(17500.0));
        assert_eq!(fx.store.all().unwrap().len(), 1);
    }

    #[test]
    fn completed_ticket_is_read_only() {
        let mut fx = fixture();
        fx.workflow.enter_ticket("T0001").unwrap();
        fill(&mut fx.workflow);
        fx.workflow.capture_first_weight().unwrap();
        fx.workflow.capture_second_weight().unwrap();

        fx.workflow.clear();
        assert_eq!(fx.workflow.enter_ticket("T0001").unwrap(), TicketState::Completed);
        let edit = FormSnapshot::default().with(FormField::AgencyName, "Other");
        assert!(fx.workflow.update_form(&edit).is_err());
        assert!(fx.workflow.save_form().is_err());
        assert!(fx.workflow.attach_image(ImageSide::Front, "x.jpg").is_err());
    }

    #[test]
    fn clearing_the_form_announces_the_reset() {
        let mut fx = fixture();
        fx.workflow.enter_ticket("T0001").unwrap();
        fill(&mut fx.workflow);
        fx.workflow.capture_first_weight().unwrap();
        fx.sink.0.lock().unwrap().clear();

        fx.workflow.clear();
        assert_eq!(fx.workflow.state(), TicketState::New);
        assert!(fx.workflow.ticket().ticket_no.is_empty());
        let events = fx.sink.0.lock().unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(
            &events[0],
            CoreEvent::TicketStateChanged { ticket_no, state: TicketState::New } if ticket_no.is_empty()
        ));
    }

    #[test]
    fn entering_unknown_ticket_after_stored_one_starts_fresh() {
        let mut fx = fixture();
        fx.workflow.enter_ticket("T0001").unwrap();
        fill(&mut fx.workflow);
        fx.workflow.capture_first_weight().unwrap();

        assert_eq!(fx.workflow.enter_ticket("T0002").unwrap(), TicketState::New);
        assert_eq!(fx.workflow.ticket().vehicle_no, "");
        assert_eq!(fx.workflow.ticket().site_name, "Guntur");
        assert_eq!(fx.workflow.ticket().first_weight, None);
    }

    #[test]
    fn pending_ticket_edits_are_saved_in_place() {
        let mut fx = fixture();
        fx.workflow.enter_ticket("T0001").unwrap();
        fill(&mut fx.workflow);
        fx.workflow.capture_first_weight().unwrap();

        let edit = FormSnapshot::default().with(FormField::Material, "C&D");
        fx.workflow.update_form(&edit).unwrap();
        fx.workflow.save_form().unwrap();

        let stored = fx.store.find_by_ticket("T0001").unwrap().unwrap();
        assert_eq!(stored.material, "C&D");
        assert_eq!(stored.first_weight, Some(18000.0));
    }

    #[test]
    fn image_names_use_site_vehicle_and_stamp() {
        let mut fx = fixture();
        assert!(matches!(
            fx.workflow.image_name(ImageSide::Front),
            Err(ValidationError::VehicleRequiredForImage)
        ));

        fill(&mut fx.workflow);
        let at = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(9, 15, 7)
            .unwrap();
        let name = fx.workflow.image_name_at(ImageSide::Back, at).unwrap();
        assert_eq!(name.file_name, "Guntur_AP07_TX_4431_20240305_091507_back.jpg");
        assert_eq!(name.watermark, "Guntur - AP07_TX_4431 - 20240305_091507");
    }

    #[test]
    fn image_on_pending_ticket_is_persisted() {
        let mut fx = fixture();
        fx.workflow.enter_ticket("T0001").unwrap();
        fill(&mut fx.workflow);
        fx.workflow
            .attach_image(ImageSide::Front, "front.jpg")
            .unwrap();
        assert!(fx.store.all().unwrap().is_empty());

        fx.workflow.capture_first_weight().unwrap();
        fx.workflow.attach_image(ImageSide::Back, "back.jpg").unwrap();

        let stored = fx.store.find_by_ticket("T0001").unwrap().unwrap();
        assert_eq!(stored.front_image.as_deref(), Some("front.jpg"));
        assert_eq!(stored.back_image.as_deref(), Some("back.jpg"));
    }

    #[test]
    fn next_ticket_number_is_entered() {
        let mut fx = fixture();
        assert_eq!(fx.workflow.next_ticket_no().unwrap(), "T0001");
        assert_eq!(fx.workflow.ticket().ticket_no, "T0001");
        assert_eq!(fx.workflow.state(), TicketState::New);
    }
}
