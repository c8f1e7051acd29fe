use crate::{
    clock::{ClockFlowController, FlowSnapshot, SubmitOutcome},
    models::{ClockDirection, FlowContext},
    roster::ClockLists,
    AppState,
};

fn controller_from_state(state: &AppState) -> ClockFlowController {
    state.clock.clone()
}

pub async fn get_clock_state(state: &AppState) -> Result<FlowSnapshot, String> {
    let controller = controller_from_state(state);
    Ok(controller.snapshot().await)
}

pub async fn open_clock(
    state: &AppState,
    employee_id: String,
    site_id: String,
    direction: ClockDirection,
) -> Result<FlowSnapshot, String> {
    let controller = controller_from_state(state);
    controller
        .open(FlowContext::new(employee_id, site_id, direction))
        .await
        .map_err(|e| e.to_string())
}

pub async fn capture_selfie(state: &AppState) -> Result<FlowSnapshot, String> {
    let controller = controller_from_state(state);
    controller.capture_image().await.map_err(|e| e.to_string())
}

pub async fn retake_selfie(state: &AppState) -> Result<FlowSnapshot, String> {
    let controller = controller_from_state(state);
    controller.retake_image().await.map_err(|e| e.to_string())
}

pub async fn override_location(state: &AppState) -> Result<FlowSnapshot, String> {
    let controller = controller_from_state(state);
    controller
        .override_location()
        .await
        .map_err(|e| e.to_string())
}

/// The confirm button. A failed submission comes back as `Err` with the
/// reason; the flow itself stays resubmittable.
pub async fn confirm_clock(state: &AppState) -> Result<FlowSnapshot, String> {
    let controller = controller_from_state(state);
    match controller.submit().await.map_err(|e| e.to_string())? {
        SubmitOutcome::Submitted(_) | SubmitOutcome::Ignored => Ok(controller.snapshot().await),
        SubmitOutcome::Failed(reason) => Err(reason),
    }
}

pub async fn close_clock(state: &AppState) -> Result<FlowSnapshot, String> {
    let controller = controller_from_state(state);
    Ok(controller.close().await)
}

pub async fn get_clock_lists(state: &AppState) -> Result<ClockLists, String> {
    Ok(state.roster.read().await.clone())
}
