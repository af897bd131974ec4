/**********************************************************************

Copyright (C) 2021 by reddal

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.

**********************************************************************/

use crate::{
	config::{Client, Config, Server},
	BoxStdErr,
};
use futures::future::BoxFuture;
use ladder_mux::{
	mux::{
		ClientManager, DialingWorkerFactory, IncrementalWorkerPicker, ServerWorker,
	},
	protocol::AsyncReadWrite,
	proxy::Freedom,
	transport::TcpDialer,
	utils::relay::{Counter, Relay},
	Destination, Dispatcher, Link, Network,
};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use rand::RngCore;
use std::{collections::HashMap, io, net::SocketAddr, sync::Arc};
use tokio::net::{TcpListener, UdpSocket};

type Manager = ClientManager<IncrementalWorkerPicker<DialingWorkerFactory<TcpDialer>>>;
type Id = u64;

const MAX_DATAGRAM_SIZE: usize = 64 * 1024;

/// Runs every client and server in `conf` until one of them fails.
pub async fn serve(conf: Config) -> Result<(), BoxStdErr> {
	let mut tasks: Vec<BoxFuture<'static, io::Result<()>>> = Vec::new();

	if let Some(server) = &conf.server {
		let dispatcher: Arc<dyn Dispatcher> =
			Arc::new(Freedom::new().with_dial_timeout(server.dial_timeout()));
		for addr in &server.listen {
			let listener = TcpListener::bind(addr).await?;
			warn!("Serving mux server on {}", addr);
			tasks.push(Box::pin(serve_mux_server(listener, dispatcher.clone())));
		}
	}

	if let Some(client) = &conf.client {
		let manager = Arc::new(new_manager(client));
		let dst = Destination::new(client.network, client.target.clone());
		for addr in &client.listen {
			match client.network {
				Network::Tcp => {
					let listener = TcpListener::bind(addr).await?;
					warn!("Serving mux client on tcp:{} to {}", addr, dst);
					tasks.push(Box::pin(serve_tcp_client(
						listener,
						manager.clone(),
						dst.clone(),
					)));
				}
				Network::Udp => {
					let socket = UdpSocket::bind(addr).await?;
					warn!("Serving mux client on udp:{} to {}", addr, dst);
					tasks.push(Box::pin(serve_udp_client(
						socket,
						manager.clone(),
						dst.clone(),
					)));
				}
			}
		}
	}

	futures::future::try_join_all(tasks).await?;
	Ok(())
}

fn new_manager(client: &Client) -> Manager {
	let factory = DialingWorkerFactory::new(TcpDialer::new(client.server.clone()), client.strategy)
		.with_idle_check(client.idle_check());
	ClientManager::new(IncrementalWorkerPicker::new(factory))
}

async fn serve_mux_server(listener: TcpListener, dispatcher: Arc<dyn Dispatcher>) -> io::Result<()> {
	loop {
		let (stream, src) = listener.accept().await?;
		// randomly generated connection ID
		let conn_id = rand::thread_rng().next_u64();
		let dispatcher = dispatcher.clone();
		tokio::spawn(async move {
			info!("[{conn_id:x}] mux connection from {src}");
			if let Err(e) = stream.set_nodelay(true) {
				debug!("[{conn_id:x}] cannot set TCP_NODELAY ({e})");
			}
			let (r, w) = AsyncReadWrite::split(Box::new(stream));
			let worker = ServerWorker::new(dispatcher, r, w);
			worker.wait().await;
			info!(
				"[{conn_id:x}] mux connection closed after {} sessions",
				worker.total_connections()
			);
		});
	}
}

async fn serve_tcp_client(
	listener: TcpListener,
	manager: Arc<Manager>,
	dst: Destination,
) -> io::Result<()> {
	loop {
		let (stream, src) = listener.accept().await?;
		let conn_id = rand::thread_rng().next_u64();
		let manager = manager.clone();
		let dst = dst.clone();
		tokio::spawn(async move {
			info!("[{conn_id:x}] tunneling connection from {src} to {dst}");
			if let Err(e) = handle_tcp_client(conn_id, stream, &manager, &dst).await {
				error!("[{conn_id:x}] error occurred in connection from {src}: {e}");
			}
		});
	}
}

async fn handle_tcp_client(
	conn_id: Id,
	stream: tokio::net::TcpStream,
	manager: &Manager,
	dst: &Destination,
) -> Result<(), BoxStdErr> {
	let (local, remote) = Link::bounded_pair();
	manager.dispatch(dst, &remote).await?;

	let recv = Counter::new(0);
	let send = Counter::new(0);
	let id = format!("{conn_id:x}");
	let mut relay = Relay::new(&id);
	relay.set_recv(recv.clone()).set_send(send.clone());
	let res = relay.relay_link(Box::new(stream), local).await;
	info!(
		"[{id}] connection closed, sent {} bytes, received {} bytes",
		send.get(),
		recv.get()
	);
	res.map_err(Into::into)
}

/// Local UDP associations by source address.
type UdpAssociations = Arc<Mutex<HashMap<SocketAddr, Link>>>;

async fn serve_udp_client(socket: UdpSocket, manager: Arc<Manager>, dst: Destination) -> io::Result<()> {
	let socket = Arc::new(socket);
	let associations = UdpAssociations::default();
	let mut buf = vec![0_u8; MAX_DATAGRAM_SIZE];
	loop {
		let (n, src) = socket.recv_from(&mut buf).await?;
		let data = bytes::Bytes::copy_from_slice(&buf[..n]);

		let existing = associations.lock().get(&src).cloned();
		let link = if let Some(link) = existing {
			link
		} else {
			let (local, remote) = Link::bounded_pair();
			if let Err(e) = manager.dispatch(&dst, &remote).await {
				error!("cannot tunnel datagrams from {src} ({e})");
				continue;
			}
			info!("new UDP association from {src} to {dst}");
			associations.lock().insert(src, local.clone());
			tokio::spawn(send_back(
				socket.clone(),
				src,
				local.clone(),
				associations.clone(),
			));
			local
		};

		if let Err(e) = link.writer.write_buf(data).await {
			debug!("UDP association from {src} is gone ({e})");
			associations.lock().remove(&src);
		}
	}
}

/// Sends every packet from the tunnel back to `src`.
async fn send_back(socket: Arc<UdpSocket>, src: SocketAddr, link: Link, associations: UdpAssociations) {
	let res: io::Result<()> = async {
		while let Some(packet) = link.reader.read_buf().await? {
			socket.send_to(&packet, src).await?;
		}
		Ok(())
	}
	.await;
	match res {
		Ok(()) => debug!("UDP association from {src} closed"),
		Err(e) => debug!("UDP association from {src} ended ({e})"),
	}
	associations.lock().remove(&src);
	link.close();
}
