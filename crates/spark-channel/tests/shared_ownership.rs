//! `shared_ownership` 集成测试：验证多所有者共享时的引用计数与“最后一个所有者关闭”规则。

use std::thread;

use spark_channel::{Channel, MemoryTransport, OpenMode, SharedChannel, Translation};

#[test]
fn last_owner_closes_the_channel() {
    let transport = MemoryTransport::new();
    let first = SharedChannel::new(Channel::new(transport.clone(), OpenMode::WRONLY));
    let second = first.attach();
    assert_eq!(first.ref_count(), 2);

    second.with(|channel| channel.write("hi")).expect("write");
    assert_eq!(first.detach().expect("detach"), 1);
    assert!(!transport.is_closed());

    assert_eq!(second.detach().expect("detach"), 0);
    assert!(transport.is_closed());
    assert_eq!(transport.contents(), b"hi");
}

#[test]
fn owners_on_other_threads_share_one_pipeline() {
    let transport = MemoryTransport::new();
    let mut channel = Channel::new(transport.clone(), OpenMode::WRONLY);
    channel.set_output_translation(Translation::Lf);
    let shared = SharedChannel::new(channel);

    let workers: Vec<_> = (0..4)
        .map(|i| {
            let owner = shared.attach();
            thread::spawn(move || {
                owner
                    .with(|channel| channel.write(format!("t{i}\n").as_str()))
                    .expect("write");
                owner.detach().expect("detach")
            })
        })
        .collect();
    for worker in workers {
        assert!(worker.join().expect("worker thread") >= 1);
    }

    assert_eq!(shared.ref_count(), 1);
    assert_eq!(shared.detach().expect("detach"), 0);
    let text = String::from_utf8(transport.contents()).expect("utf-8");
    let mut lines: Vec<_> = text.lines().collect();
    lines.sort_unstable();
    assert_eq!(lines, ["t0", "t1", "t2", "t3"]);
}

#[test]
fn lock_exposes_the_channel() {
    let shared = SharedChannel::new(Channel::new(MemoryTransport::new(), OpenMode::RDONLY));
    shared.lock().set_name("mem0").expect("name");
    assert_eq!(shared.lock().name(), Some("mem0"));
    assert_eq!(shared.lock().ref_count(), 1);
}
