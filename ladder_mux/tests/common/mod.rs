use ladder_mux::{
	mux::{
		ClientManager, ClientStrategy, DialingWorkerFactory, IncrementalWorkerPicker, ServerWorker,
	},
	proxy::Freedom,
	protocol::AsyncReadWrite,
	transport::TcpDialer,
	Dispatcher,
};
use lazy_static::lazy_static;
use log::{debug, error};
use std::{
	net::{Ipv4Addr, SocketAddr},
	sync::Arc,
	time::Duration,
};
use tokio::net::{TcpListener, UdpSocket};

pub const TIMEOUT_DUR: Duration = Duration::from_secs(5);

pub type Manager = ClientManager<IncrementalWorkerPicker<DialingWorkerFactory<TcpDialer>>>;

lazy_static! {
	pub static ref SERVED_DATA: Vec<u8> = "This is something, what do you expect."
		.repeat(256)
		.into_bytes();
}

pub fn setup_logger() {
	let _ = env_logger::builder().is_test(true).try_init();
}

/// Echoes everything back on every accepted TCP connection.
pub async fn spawn_tcp_echo() -> SocketAddr {
	let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
	let addr = listener.local_addr().unwrap();
	tokio::spawn(async move {
		loop {
			let (mut stream, src) = listener.accept().await.unwrap();
			debug!("echo server accepted {}", src);
			tokio::spawn(async move {
				let (mut r, mut w) = stream.split();
				if let Err(e) = tokio::io::copy(&mut r, &mut w).await {
					debug!("echo server error ({})", e);
				}
			});
		}
	});
	addr
}

/// Echoes every datagram back to its sender.
pub async fn spawn_udp_echo() -> SocketAddr {
	let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
	let addr = socket.local_addr().unwrap();
	tokio::spawn(async move {
		let mut buf = vec![0_u8; 64 * 1024];
		loop {
			let (n, src) = socket.recv_from(&mut buf).await.unwrap();
			socket.send_to(&buf[..n], src).await.unwrap();
		}
	});
	addr
}

/// Serves mux links over TCP, sending every session directly to its target.
pub async fn spawn_mux_server() -> SocketAddr {
	let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
	let addr = listener.local_addr().unwrap();
	let dispatcher: Arc<dyn Dispatcher> = Arc::new(Freedom::new());
	tokio::spawn(async move {
		loop {
			let (stream, _) = match listener.accept().await {
				Ok(item) => item,
				Err(e) => {
					error!("mux server cannot accept ({})", e);
					return;
				}
			};
			stream.set_nodelay(true).unwrap();
			let (r, w) = AsyncReadWrite::split(Box::new(stream));
			let _worker = ServerWorker::new(dispatcher.clone(), r, w);
		}
	});
	addr
}

pub fn new_manager(server_addr: SocketAddr, strategy: ClientStrategy) -> Manager {
	ClientManager::new(IncrementalWorkerPicker::new(DialingWorkerFactory::new(
		TcpDialer::new(server_addr.into()),
		strategy,
	)))
}
