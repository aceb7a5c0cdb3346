//! Modbus TCP front-end.
//!
//! Holding and input registers are one bank backed by the orchestrator's
//! [`RegisterStore`]. A single-register write (FC6) is not stored: it is a
//! trigger, acknowledged immediately with the request echoed back while the
//! run proceeds in the background.

use std::future::{self, Future};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_modbus::server::tcp::{accept_tcp_connection, Server};
use tokio_modbus::{ExceptionCode, Request, Response};

use regscore_core::registers::RegisterStore;
use regscore_pipeline::orchestrator::Orchestrator;

/// Most registers a single read may return.
pub const MAX_READ_QUANTITY: u16 = 125;
/// Most registers a single multiple-write may carry.
pub const MAX_WRITE_QUANTITY: usize = 123;

/// Per-connection service; cheap to clone.
#[derive(Clone)]
pub struct RegisterService {
    orchestrator: Arc<Orchestrator>,
}

impl RegisterService {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self { orchestrator }
    }

    fn registers(&self) -> &RegisterStore {
        self.orchestrator.registers()
    }

    /// Answer one request. Never waits on a pipeline run.
    pub fn handle(&self, request: Request<'_>) -> Result<Response, ExceptionCode> {
        match request {
            Request::ReadHoldingRegisters(address, quantity) => {
                self.read(address, quantity).map(Response::ReadHoldingRegisters)
            }
            Request::ReadInputRegisters(address, quantity) => {
                self.read(address, quantity).map(Response::ReadInputRegisters)
            }
            Request::WriteSingleRegister(address, value) => {
                tracing::info!(base = address, value, "Trigger received");
                self.orchestrator.trigger(address).map_err(|e| {
                    tracing::warn!(base = address, error = %e, "Trigger rejected");
                    ExceptionCode::IllegalDataAddress
                })?;
                Ok(Response::WriteSingleRegister(address, value))
            }
            Request::WriteMultipleRegisters(address, values) => {
                if values.is_empty() || values.len() > MAX_WRITE_QUANTITY {
                    return Err(ExceptionCode::IllegalDataValue);
                }
                self.registers()
                    .write_range(address, &values)
                    .map_err(|_| ExceptionCode::IllegalDataAddress)?;
                Ok(Response::WriteMultipleRegisters(address, values.len() as u16))
            }
            other => {
                tracing::debug!(request = ?other, "Unsupported function code");
                Err(ExceptionCode::IllegalFunction)
            }
        }
    }

    fn read(&self, address: u16, quantity: u16) -> Result<Vec<u16>, ExceptionCode> {
        if quantity == 0 || quantity > MAX_READ_QUANTITY {
            return Err(ExceptionCode::IllegalDataValue);
        }
        self.registers()
            .read_range(address, usize::from(quantity))
            .map_err(|_| ExceptionCode::IllegalDataAddress)
    }
}

impl tokio_modbus::server::Service for RegisterService {
    type Request = Request<'static>;
    type Response = Response;
    type Exception = ExceptionCode;
    type Future = future::Ready<Result<Self::Response, Self::Exception>>;

    fn call(&self, request: Self::Request) -> Self::Future {
        future::ready(self.handle(request))
    }
}

/// Accept Modbus TCP connections on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    service: RegisterService,
    shutdown: impl Future<Output = ()>,
) -> io::Result<()> {
    let server = Server::new(listener);

    let new_service = |peer: SocketAddr| {
        tracing::debug!(%peer, "Modbus client connected");
        Ok::<_, io::Error>(Some(service.clone()))
    };
    let on_connected = |stream, socket_addr| async move {
        accept_tcp_connection(stream, socket_addr, new_service)
    };
    let on_process_error = |err: io::Error| {
        tracing::warn!(error = %err, "Modbus connection closed with error");
    };

    tokio::select! {
        result = server.serve(&on_connected, on_process_error) => result,
        () = shutdown => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use std::borrow::Cow;

    use assert_matches::assert_matches;
    use async_trait::async_trait;

    use regscore_core::capability::{
        ImageSource, ScriptError, Scorer, SourceError, SourcedImage, UploadError, Uploader,
    };
    use regscore_core::score::ScoreValue;

    use super::*;

    struct StaticSource;

    #[async_trait]
    impl ImageSource for StaticSource {
        async fn get_image(&self) -> Result<SourcedImage, SourceError> {
            Ok(SourcedImage::new(b"img".to_vec(), "a.png", "image/png"))
        }
    }

    struct EchoUploader;

    #[async_trait]
    impl Uploader for EchoUploader {
        async fn upload(&self, _image: SourcedImage) -> Result<String, UploadError> {
            Ok("{}".to_string())
        }
    }

    struct ConstScorer;

    #[async_trait]
    impl Scorer for ConstScorer {
        async fn score(&self, _response: &str) -> Result<ScoreValue, ScriptError> {
            Ok(ScoreValue::Int(42))
        }
    }

    fn service() -> RegisterService {
        RegisterService::new(Arc::new(Orchestrator::new(
            Arc::new(RegisterStore::new()),
            Arc::new(StaticSource),
            Arc::new(EchoUploader),
            Arc::new(ConstScorer),
        )))
    }

    #[tokio::test]
    async fn trigger_is_acknowledged_before_any_transition() {
        let service = service();
        service.registers().write_range(10, &[9, 9, 9]).expect("seed");

        let response = service.handle(Request::WriteSingleRegister(10, 1234));

        assert_matches!(response, Ok(Response::WriteSingleRegister(10, 1234)));
        // Current-thread runtime: the spawned run has not been polled yet.
        assert_eq!(service.registers().block(10).expect("block"), [9, 9, 9]);

        for _ in 0..200 {
            if service.registers().read(10) == 5 {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        assert_eq!(service.registers().block(10).expect("block"), [5, 0, 42]);
    }

    #[tokio::test]
    async fn trigger_without_room_for_block_is_illegal_address() {
        let service = service();
        assert_matches!(
            service.handle(Request::WriteSingleRegister(65534, 1)),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(service.registers().read(65534), 0);
    }

    #[tokio::test]
    async fn holding_and_input_reads_share_one_bank() {
        let service = service();
        service
            .handle(Request::WriteMultipleRegisters(100, Cow::Owned(vec![1, 2, 3])))
            .expect("write");

        assert_matches!(
            service.handle(Request::ReadHoldingRegisters(100, 3)),
            Ok(Response::ReadHoldingRegisters(values)) if values == [1, 2, 3]
        );
        assert_matches!(
            service.handle(Request::ReadInputRegisters(101, 2)),
            Ok(Response::ReadInputRegisters(values)) if values == [2, 3]
        );
    }

    #[tokio::test]
    async fn out_of_range_access_is_illegal_address() {
        let service = service();
        assert_matches!(
            service.handle(Request::ReadHoldingRegisters(65535, 2)),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_matches!(
            service.handle(Request::WriteMultipleRegisters(65535, Cow::Owned(vec![1, 2]))),
            Err(ExceptionCode::IllegalDataAddress)
        );
        assert_eq!(service.registers().read(65535), 0);
    }

    #[tokio::test]
    async fn bad_quantities_are_illegal_value() {
        let service = service();
        assert_matches!(
            service.handle(Request::ReadHoldingRegisters(0, 0)),
            Err(ExceptionCode::IllegalDataValue)
        );
        assert_matches!(
            service.handle(Request::ReadHoldingRegisters(0, MAX_READ_QUANTITY + 1)),
            Err(ExceptionCode::IllegalDataValue)
        );
    }

    #[tokio::test]
    async fn other_function_codes_are_illegal() {
        let service = service();
        assert_matches!(
            service.handle(Request::ReadCoils(0, 1)),
            Err(ExceptionCode::IllegalFunction)
        );
        assert_matches!(
            service.handle(Request::WriteSingleCoil(0, true)),
            Err(ExceptionCode::IllegalFunction)
        );
    }
}
