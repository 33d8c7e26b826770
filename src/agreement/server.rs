//! The agreement endpoint: accepts one [AgreementMessage] per connection, hands it to the
//! [AgreementEngine] and answers with its [Ack].

use std::{
    io::{self, Write},
    net::{TcpListener, TcpStream},
    sync::{
        mpsc::{Receiver, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use super::{
    engine::AgreementEngine,
    messages::{Ack, AgreementMessage},
    network::AgreementNetwork,
};

const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(20);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

pub fn start_agreement_server<N: AgreementNetwork>(
    listener: TcpListener,
    engine: Arc<AgreementEngine<N>>,
    shutdown_signal: Receiver<()>,
) -> io::Result<JoinHandle<()>> {
    listener.set_nonblocking(true)?;
    Ok(thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match listener.accept() {
            Ok((stream, remote)) => {
                let engine = engine.clone();
                thread::spawn(move || {
                    if let Err(err) = serve(stream, &engine) {
                        log::debug!("Agreement request from {} failed: {}", remote, err);
                    }
                });
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
            Err(err) => {
                log::warn!("Agreement accept failed: {}", err);
                thread::sleep(ACCEPT_POLL_INTERVAL)
            }
        }
    }))
}

fn serve<N: AgreementNetwork>(stream: TcpStream, engine: &AgreementEngine<N>) -> io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(REQUEST_TIMEOUT))?;
    stream.set_write_timeout(Some(REQUEST_TIMEOUT))?;

    let request = serde_json::Deserializer::from_reader(&stream)
        .into_iter::<AgreementMessage>()
        .next();
    let ack = match request {
        Some(Ok(message)) => engine.handle(message),
        Some(Err(err)) => Ack::error(format!("malformed request: {}", err)),
        None => return Ok(()),
    };

    let mut writer = &stream;
    serde_json::to_writer(&mut writer, &ack)?;
    writer.flush()
}
