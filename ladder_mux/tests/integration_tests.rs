mod common;

use common::{
	new_manager, setup_logger, spawn_mux_server, spawn_tcp_echo, spawn_udp_echo, SERVED_DATA,
	TIMEOUT_DUR,
};
use bytes::Bytes;
use ladder_mux::{mux::ClientStrategy, Destination, Link};
use std::{io, net::Ipv4Addr, sync::Arc};
use tokio::{io::AsyncReadExt, net::TcpListener, time::timeout};

#[test]
fn test_integration_tcp() {
	setup_logger();
	let rt = tokio::runtime::Runtime::new().unwrap();
	rt.block_on(async move {
		let echo_addr = spawn_tcp_echo().await;
		let server_addr = spawn_mux_server().await;
		let manager = Arc::new(new_manager(
			server_addr,
			ClientStrategy {
				max_concurrency: 4,
				max_connection: 0,
			},
		));

		let mut tasks = Vec::new();
		for _ in 0..10 {
			let manager = manager.clone();
			tasks.push(tokio::spawn(async move {
				let (local, remote) = Link::bounded_pair();
				manager
					.dispatch(&Destination::tcp(echo_addr), &remote)
					.await
					.unwrap();
				local
					.writer
					.write_buf(Bytes::copy_from_slice(&SERVED_DATA))
					.await
					.unwrap();

				let mut received = vec![0_u8; SERVED_DATA.len()];
				let mut reader = local.reader.clone();
				timeout(TIMEOUT_DUR, reader.read_exact(&mut received))
					.await
					.unwrap()
					.unwrap();
				assert!(received == *SERVED_DATA);

				local.writer.close();
				let rest = timeout(TIMEOUT_DUR, local.reader.read_buf()).await.unwrap();
				assert!(rest.unwrap().is_none());
			}));
		}
		for task in tasks {
			task.await.unwrap();
		}
	});
}

#[test]
fn test_integration_udp() {
	setup_logger();
	let rt = tokio::runtime::Runtime::new().unwrap();
	rt.block_on(async move {
		let echo_addr = spawn_udp_echo().await;
		let server_addr = spawn_mux_server().await;
		let manager = new_manager(server_addr, ClientStrategy::default());

		let (local, remote) = Link::bounded_pair();
		manager
			.dispatch(&Destination::udp(echo_addr), &remote)
			.await
			.unwrap();
		for i in 0..3_u8 {
			let packet = vec![i; 1000 + usize::from(i)];
			local.writer.write_buf(packet.clone().into()).await.unwrap();
			let data = timeout(TIMEOUT_DUR, local.reader.read_buf()).await.unwrap();
			// Packet boundaries are kept end to end.
			assert_eq!(data.unwrap().unwrap(), packet);
		}
	});
}

#[test]
fn test_integration_unreachable_target() {
	setup_logger();
	let rt = tokio::runtime::Runtime::new().unwrap();
	rt.block_on(async move {
		let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
		let closed_addr = listener.local_addr().unwrap();
		drop(listener);
		let server_addr = spawn_mux_server().await;
		let manager = new_manager(server_addr, ClientStrategy::default());

		let (local, remote) = Link::bounded_pair();
		manager
			.dispatch(&Destination::tcp(closed_addr), &remote)
			.await
			.unwrap();
		local
			.writer
			.write_buf(Bytes::from_static(b"anyone there?"))
			.await
			.unwrap();
		let res = timeout(TIMEOUT_DUR, local.reader.read_buf()).await.unwrap();
		assert_eq!(res.unwrap_err().kind(), io::ErrorKind::ConnectionAborted);

		// The physical link is still usable.
		let echo_addr = spawn_tcp_echo().await;
		let (local, remote) = Link::bounded_pair();
		manager
			.dispatch(&Destination::tcp(echo_addr), &remote)
			.await
			.unwrap();
		local.writer.write_buf(Bytes::from_static(b"ping")).await.unwrap();
		let data = timeout(TIMEOUT_DUR, local.reader.read_buf()).await.unwrap();
		assert_eq!(data.unwrap().unwrap(), &b"ping"[..]);
	});
}

#[test]
fn test_integration_mux_server_unreachable() {
	setup_logger();
	let rt = tokio::runtime::Runtime::new().unwrap();
	rt.block_on(async move {
		let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
		let closed_addr = listener.local_addr().unwrap();
		drop(listener);
		let manager = new_manager(closed_addr, ClientStrategy::default());
		let (_local, remote) = Link::bounded_pair();
		assert!(manager
			.dispatch(&Destination::tcp(closed_addr), &remote)
			.await
			.is_err());
	});
}
