//! Windows service control manager integration.
//!
//! The dispatcher calls `service_main` on its own thread. From there we
//! register the control handler, open the event log sink, and run the
//! [`ServiceController`] on a Tokio runtime. Control events become
//! [`ControlCommand`]s; reported statuses are drained into
//! `SetServiceStatus` calls. A failure inside the service is handed back
//! through [`DispatchOutcome`] so the binary exits non-zero.

use std::ffi::OsString;
use std::sync::{Arc, OnceLock};

use tokio::sync::mpsc;
use windows_service::service::{
    ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState, ServiceStatus as ScmStatus,
    ServiceType,
};
use windows_service::service_control_handler::{self, ServiceControlHandlerResult, ServiceStatusHandle};
use windows_service::{define_windows_service, service_dispatcher};

use crate::config::{RelayConfig, Upstream};
use crate::http::HttpServer;
use crate::lifecycle::controller::{self, LifecycleError};
use crate::lifecycle::service::{
    ChannelReporter, ControlCommand, DispatchOutcome, LifecycleState, ServiceController, ServiceStatus,
    STATUS_CHANNEL_CAPACITY,
};
use crate::observability::{sink, LogSink};

struct Launch {
    config: RelayConfig,
    upstream: Upstream,
}

// service_main is a plain fn pointer; startup state and the outcome have to be global.
static LAUNCH: OnceLock<Launch> = OnceLock::new();
static OUTCOME: DispatchOutcome = DispatchOutcome::new();

define_windows_service!(ffi_service_main, service_main);

/// Hand control to the service dispatcher. Blocks until the service stops.
///
/// Returns the service's own failure, if it had one, once dispatching ends.
pub fn run_dispatcher(config: RelayConfig, upstream: Upstream) -> Result<(), LifecycleError> {
    let name = config.service.name.clone();
    LAUNCH
        .set(Launch { config, upstream })
        .map_err(|_| LifecycleError::Registration("service dispatcher already started".into()))?;

    let dispatched = service_dispatcher::start(&name, ffi_service_main)
        .map_err(|e| LifecycleError::Registration(format!("{} service failed: {}", name, e)));
    OUTCOME.finish(dispatched)
}

fn service_main(_arguments: Vec<OsString>) {
    let Some(launch) = LAUNCH.get() else {
        return;
    };
    if let Err(e) = run_service(launch) {
        tracing::error!(service = %launch.config.service.name, error = %e, "Service failed");
        OUTCOME.fail(e);
    }
}

fn run_service(launch: &Launch) -> Result<(), LifecycleError> {
    let name = &launch.config.service.name;

    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    let handler = move |control: ServiceControl| -> ServiceControlHandlerResult {
        let command = match control {
            ServiceControl::Stop => ControlCommand::Stop,
            ServiceControl::Shutdown => ControlCommand::Shutdown,
            ServiceControl::Interrogate => ControlCommand::Interrogate,
            ServiceControl::Pause => ControlCommand::Pause,
            ServiceControl::Continue => ControlCommand::Continue,
            other => ControlCommand::Other(format!("{:?}", other)),
        };
        if commands_tx.send(command).is_err() {
            return ServiceControlHandlerResult::Other(1);
        }
        ServiceControlHandlerResult::NoError
    };

    let status_handle = service_control_handler::register(name, handler)
        .map_err(|e| LifecycleError::Registration(e.to_string()))?;

    // Once registered, every setup failure is reported to the manager.
    let abort = |error: LifecycleError| {
        let _ = status_handle.set_service_status(scm_status(&ServiceStatus::stopped(1)));
        error
    };

    let sink: Arc<dyn LogSink> = sink::open(name, false)
        .map_err(|e| abort(LifecycleError::Registration(format!("event log: {}", e))))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| {
            sink.error(&format!("could not start runtime: {}", e));
            abort(LifecycleError::Registration(e.to_string()))
        })?;

    let server = HttpServer::from_config(&launch.config, launch.upstream.clone()).map_err(|e| {
        sink.error(&e.to_string());
        abort(e.into())
    })?;

    sink.info(&format!("starting {} service", name));
    let result = runtime.block_on(async {
        let (reporter, statuses) = ChannelReporter::new(STATUS_CHANNEL_CAPACITY);
        let drain = tokio::spawn(drain_statuses(status_handle, statuses));

        let service = ServiceController::new(server, &launch.config, Arc::clone(&sink), reporter, commands_rx);
        let result = controller::run(service).await;

        // The reporter went away with the controller; this ends once Stopped is delivered.
        let _ = drain.await;
        result
    });

    match &result {
        Ok(_) => sink.info(&format!("{} service stopped", name)),
        Err(e) => sink.error(&format!("{} service failed: {}", name, e)),
    }
    result.map(|_| ())
}

async fn drain_statuses(handle: ServiceStatusHandle, mut statuses: mpsc::Receiver<ServiceStatus>) {
    while let Some(status) = statuses.recv().await {
        if let Err(e) = handle.set_service_status(scm_status(&status)) {
            tracing::error!(state = ?status.state, error = %e, "Failed to report service status");
        }
    }
}

fn scm_status(status: &ServiceStatus) -> ScmStatus {
    let current_state = match status.state {
        LifecycleState::StartPending => ServiceState::StartPending,
        LifecycleState::Running => ServiceState::Running,
        LifecycleState::StopPending => ServiceState::StopPending,
        LifecycleState::Stopped => ServiceState::Stopped,
    };
    let controls_accepted = if status.accepts_controls {
        ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN | ServiceControlAccept::PAUSE_CONTINUE
    } else {
        ServiceControlAccept::empty()
    };

    ScmStatus {
        service_type: ServiceType::OWN_PROCESS,
        current_state,
        controls_accepted,
        exit_code: ServiceExitCode::Win32(status.exit_code),
        checkpoint: 0,
        wait_hint: status.wait_hint,
        process_id: None,
    }
}
