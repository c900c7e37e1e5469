//! Shell procedures for turning a bare Debian/Ubuntu host into a cluster node
//!
//! Every generator is pure: it only renders text. Scripts are safe to run
//! more than once; stages that cannot be repeated (`kubeadm init`,
//! `kubeadm join`) are guarded by the files they leave behind.
//!
//! Scripts meant for root are run with `run_script_sudo`; the kubectl ones
//! run as the SSH user so `$HOME/.kube/config` ends up in the right home.

use crate::config::{BootstrapConfig, CniPlugin, DEFAULT_API_SERVER_PORT};
use crate::ssh::shell_quote;

use super::join::{CERT_KEY_MARKER, JOIN_MARKER};

const ADMIN_CONF: &str = "/etc/kubernetes/admin.conf";
const KUBELET_CONF: &str = "/etc/kubernetes/kubelet.conf";

/// Stage 1: kernel modules and sysctls required by kube-proxy and the CNI
#[must_use]
pub fn kernel_modules_script() -> String {
    r"set -euo pipefail
cat > /etc/modules-load.d/k8s.conf <<'EOF'
overlay
br_netfilter
EOF
modprobe overlay
modprobe br_netfilter
cat > /etc/sysctl.d/k8s.conf <<'EOF'
net.bridge.bridge-nf-call-iptables  = 1
net.bridge.bridge-nf-call-ip6tables = 1
net.ipv4.ip_forward                 = 1
EOF
sysctl --system >/dev/null
"
    .to_string()
}

/// Stage 2: containerd with the systemd cgroup driver
#[must_use]
pub fn container_runtime_script() -> String {
    r"set -euo pipefail
export DEBIAN_FRONTEND=noninteractive
if ! command -v containerd >/dev/null 2>&1; then
  apt-get update -q
  apt-get install -y -q containerd
fi
mkdir -p /etc/containerd
if ! grep -qs 'SystemdCgroup = true' /etc/containerd/config.toml; then
  containerd config default > /etc/containerd/config.toml
  sed -i 's/SystemdCgroup = false/SystemdCgroup = true/' /etc/containerd/config.toml
fi
systemctl restart containerd
systemctl enable containerd
"
    .to_string()
}

/// Stage 3: swap off, pkgs.k8s.io repository, kubelet/kubeadm/kubectl held
#[must_use]
pub fn kubernetes_tools_script(config: &BootstrapConfig) -> String {
    let minor = config.minor_version();
    format!(
        r"set -euo pipefail
export DEBIAN_FRONTEND=noninteractive
swapoff -a
sed -i '/^[^#].*\sswap\s/ s/^/#/' /etc/fstab
apt-get update -q
apt-get install -y -q apt-transport-https ca-certificates curl gpg
mkdir -p -m 755 /etc/apt/keyrings
curl -fsSL https://pkgs.k8s.io/core:/stable:/v{minor}/deb/Release.key \
  | gpg --dearmor --batch --yes -o /etc/apt/keyrings/kubernetes-apt-keyring.gpg
echo 'deb [signed-by=/etc/apt/keyrings/kubernetes-apt-keyring.gpg] https://pkgs.k8s.io/core:/stable:/v{minor}/deb/ /' \
  > /etc/apt/sources.list.d/kubernetes.list
apt-get update -q
apt-mark unhold kubelet kubeadm kubectl >/dev/null 2>&1 || true
apt-get install -y -q kubelet kubeadm kubectl
apt-mark hold kubelet kubeadm kubectl
systemctl enable --now kubelet
"
    )
}

/// Stage 4: `kubeadm init`, then the join command and certificate key behind markers
#[must_use]
pub fn control_plane_init_script(config: &BootstrapConfig) -> String {
    let mut init_flags = vec![
        format!("--kubernetes-version {}", shell_quote(&config.kubeadm_version())),
        format!("--pod-network-cidr {}", shell_quote(config.pod_cidr())),
        format!("--service-cidr {}", shell_quote(config.service_cidr())),
        "--apiserver-advertise-address \"$ADVERTISE_ADDRESS\"".to_string(),
    ];
    if let Some(endpoint) = config.control_plane_address() {
        init_flags.push(format!("--control-plane-endpoint {}", shell_quote(endpoint)));
    }
    init_flags.push("--upload-certs".to_string());

    format!(
        r#"set -euo pipefail
if [ ! -f {ADMIN_CONF} ]; then
  ADVERTISE_ADDRESS="$(hostname -I | awk '{{print $1}}')"
  if [ -z "$ADVERTISE_ADDRESS" ]; then
    echo "no routable address found" >&2
    exit 1
  fi
  kubeadm init \
    {flags}
fi
{token}"#,
        flags = init_flags.join(" \\\n    "),
        token = join_token_script(true),
    )
}

/// Stage 5: admin kubeconfig for the SSH user
#[must_use]
pub fn kubectl_setup_script() -> String {
    format!(
        r#"set -euo pipefail
mkdir -p "$HOME/.kube"
sudo -n cp -f {ADMIN_CONF} "$HOME/.kube/config"
sudo -n chown "$(id -u):$(id -g)" "$HOME/.kube/config"
chmod 600 "$HOME/.kube/config"
"#
    )
}

/// Stage 6: apply the pinned CNI manifest
#[must_use]
pub fn cni_script(plugin: CniPlugin) -> String {
    format!(
        "set -euo pipefail\nkubectl apply -f {}\n",
        shell_quote(plugin.manifest_url())
    )
}

/// Stage 7: join as a worker using the token and CA hash in `config`
#[must_use]
pub fn worker_join_script(config: &BootstrapConfig) -> String {
    join_script(config, None)
}

/// Join as an additional control-plane replica
#[must_use]
pub fn control_plane_join_script(config: &BootstrapConfig, certificate_key: &str) -> String {
    join_script(config, Some(certificate_key))
}

fn join_script(config: &BootstrapConfig, certificate_key: Option<&str>) -> String {
    let address = config
        .control_plane_address()
        .map_or_else(|| format!("127.0.0.1:{DEFAULT_API_SERVER_PORT}"), str::to_string);

    let mut flags = vec![
        shell_quote(&address),
        format!("--token {}", shell_quote(config.join_token())),
        format!(
            "--discovery-token-ca-cert-hash {}",
            shell_quote(config.ca_cert_hash())
        ),
    ];
    if let Some(key) = certificate_key {
        flags.push("--control-plane".to_string());
        flags.push(format!("--certificate-key {}", shell_quote(key)));
    }

    format!(
        r"set -euo pipefail
if [ -f {KUBELET_CONF} ]; then
  echo 'node already joined'
  exit 0
fi
kubeadm join {}
",
        flags.join(" ")
    )
}

/// Print a fresh join command behind [`JOIN_MARKER`] (run as root on a live control plane)
///
/// With `certificate_key`, certificates are re-uploaded and the new key is
/// printed behind [`CERT_KEY_MARKER`].
#[must_use]
pub fn join_token_script(certificate_key: bool) -> String {
    let mut script = format!(
        "set -euo pipefail\necho '{JOIN_MARKER}'\nkubeadm token create --print-join-command --kubeconfig {ADMIN_CONF}\n"
    );
    if certificate_key {
        script.push_str(&format!(
            "echo \"{CERT_KEY_MARKER} $(kubeadm init phase upload-certs --upload-certs --kubeconfig {ADMIN_CONF} 2>/dev/null | tail -1)\"\n"
        ));
    }
    script
}

/// Undo a bootstrap so the host can be reused or decommissioned
#[must_use]
pub fn reset_script() -> String {
    r#"set -uo pipefail
if command -v kubeadm >/dev/null 2>&1; then
  kubeadm reset -f
fi
rm -rf /etc/cni/net.d /var/lib/etcd /var/lib/kubelet/pki
for home in /root /home/*; do
  rm -f "$home/.kube/config"
done
if command -v iptables >/dev/null 2>&1; then
  iptables -F && iptables -t nat -F && iptables -t mangle -F && iptables -X
fi
systemctl restart containerd || true
"#
    .to_string()
}

/// Node list as JSON, via the SSH user's kubeconfig
#[must_use]
pub fn node_status_command() -> &'static str {
    "kubectl get nodes -o json"
}

#[must_use]
pub fn control_plane_pods_command() -> &'static str {
    "kubectl get pods -n kube-system -l tier=control-plane -o json"
}

#[must_use]
pub fn server_version_command() -> &'static str {
    "kubectl version -o json"
}

/// The name kubelet registers this host under
#[must_use]
pub fn node_name_command() -> &'static str {
    "hostname | tr '[:upper:]' '[:lower:]'"
}

#[must_use]
pub fn drain_node_command(node: &str) -> String {
    format!(
        "kubectl drain {} --ignore-daemonsets --delete-emptydir-data --force --timeout=120s",
        shell_quote(node)
    )
}

#[must_use]
pub fn delete_node_command(node: &str) -> String {
    format!("kubectl delete node {} --ignore-not-found", shell_quote(node))
}

#[must_use]
pub fn label_node_command(node: &str, key: &str, value: &str) -> String {
    format!(
        "kubectl label node {} {} --overwrite",
        shell_quote(node),
        shell_quote(&format!("{key}={value}"))
    )
}
